//! Raw HCI socket backend for SwitchBot scanning.
//!
//! Opens a raw Linux HCI socket, enables passive LE scanning and parses the
//! LE advertising reports itself, so the BlueZ daemon is not needed. Requires
//! CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges.

use super::{ADVERTISEMENT_CHANNEL_BUFFER_SIZE, ScanError, device_id};
use crate::advertisement::Advertisement;
use libc::{
    AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_RAW, c_int, c_void, sockaddr, socklen_t,
};
use std::collections::HashMap;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::SystemTime;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;
const HCI_DEV: u16 = 0;

// HCI packet types
const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

const LE_SCAN_PASSIVE: u8 = 0x00;
const LE_PUBLIC_ADDRESS: u8 = 0x00;
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;
// 10ms in 0.625ms units
const SCAN_INTERVAL: u16 = 0x0010;
const SCAN_WINDOW: u16 = 0x0010;

const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

// Max HCI event size
const HCI_MAX_EVENT_SIZE: usize = 260;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
#[derive(Default)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << u32::from(ptype);
    }

    fn set_event(&mut self, event: u8) {
        let bit = usize::from(event);
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

fn os_error(context: &str) -> ScanError {
    ScanError::Bluetooth(format!("{context}: {}", io::Error::last_os_error()))
}

/// Create an HCI command packet
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// LE Set Scan Parameters payload: passive scan, public address, accept all.
fn scan_parameters() -> Vec<u8> {
    let mut params = Vec::with_capacity(7);
    params.push(LE_SCAN_PASSIVE);
    params.extend_from_slice(&SCAN_INTERVAL.to_le_bytes());
    params.extend_from_slice(&SCAN_WINDOW.to_le_bytes());
    params.push(LE_PUBLIC_ADDRESS);
    params.push(FILTER_POLICY_ACCEPT_ALL);
    params
}

/// Open a non-blocking raw HCI socket bound to `dev_id`.
///
/// libc is used directly since BTPROTO_HCI sockets are not covered by std or tokio.
fn open_hci_socket(dev_id: u16) -> Result<OwnedFd, ScanError> {
    // SOCK_NONBLOCK is required for AsyncFd
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };
    if fd < 0 {
        return Err(os_error("Failed to create HCI socket"));
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: HCI_CHANNEL_RAW,
    };
    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };
    if ret < 0 {
        return Err(os_error("Failed to bind HCI socket"));
    }

    Ok(fd)
}

/// Only let LE meta events through to `fd`.
fn set_hci_filter(fd: &OwnedFd) -> Result<(), ScanError> {
    let mut filter = HciFilter::default();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_event(EVT_LE_META_EVENT);

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            SOL_HCI,
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };
    if ret < 0 {
        return Err(os_error("Failed to set HCI filter"));
    }
    Ok(())
}

fn send_hci_command(fd: &OwnedFd, packet: &[u8]) -> Result<(), ScanError> {
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };
    if ret < 0 {
        return Err(os_error("Failed to send HCI command"));
    }
    Ok(())
}

/// Configure and enable passive LE scanning without duplicate filtering, so
/// every broadcast of a sensor is reported.
fn configure_le_scan(fd: &OwnedFd) -> Result<(), ScanError> {
    let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, &scan_parameters());
    send_hci_command(fd, &packet)?;

    // enable, filter_dup off
    let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[0x01, 0x00]);
    send_hci_command(fd, &packet)
}

/// Collect the manufacturer-specific AD structures of one advertising payload.
///
/// Parsing stops at the first malformed structure; what was collected so far is kept.
fn parse_manufacturer_data(ad_data: &[u8]) -> HashMap<u16, Vec<u8>> {
    let mut manufacturer_data = HashMap::new();
    let mut offset = 0;

    while offset < ad_data.len() {
        let len = usize::from(ad_data[offset]);
        if len == 0 || offset + 1 + len > ad_data.len() {
            break;
        }

        let ad_type = ad_data[offset + 1];
        if ad_type == AD_TYPE_MANUFACTURER_DATA && len >= 3 {
            let company = u16::from_le_bytes([ad_data[offset + 2], ad_data[offset + 3]]);
            manufacturer_data.insert(company, ad_data[offset + 4..offset + 1 + len].to_vec());
        }

        offset += 1 + len;
    }

    manufacturer_data
}

/// Parse an LE Advertising Report event into advertisements.
///
/// `packet` starts at the HCI packet type byte. Reports are laid out one after
/// another (event type, address type, address, data length, data, RSSI).
/// Reports without manufacturer data are skipped, and a truncated report ends
/// parsing.
fn parse_advertising_report(packet: &[u8], timestamp: SystemTime) -> Vec<Advertisement> {
    let mut advertisements = Vec::new();

    // packet type, event code, parameter length, subevent
    if packet.len() < 5
        || packet[0] != HCI_EVENT_PKT
        || packet[1] != EVT_LE_META_EVENT
        || packet[3] != EVT_LE_ADVERTISING_REPORT
    {
        return advertisements;
    }

    let num_reports = usize::from(packet[4]);
    let mut report = &packet[5..];

    for _ in 0..num_reports {
        // event type(1) + address type(1) + address(6) + data length(1)
        if report.len() < 9 {
            break;
        }
        let data_len = usize::from(report[8]);
        // + data + rssi(1)
        if report.len() < 9 + data_len + 1 {
            break;
        }

        let mut address = [0u8; 6];
        address.copy_from_slice(&report[2..8]);
        address.reverse(); // HCI uses little-endian addresses

        let manufacturer_data = parse_manufacturer_data(&report[9..9 + data_len]);
        let rssi = report[9 + data_len] as i8;

        if !manufacturer_data.is_empty() {
            advertisements.push(Advertisement {
                device_id: device_id(address),
                rssi: f64::from(rssi),
                manufacturer_data,
                timestamp,
            });
        }

        report = &report[9 + data_len + 1..];
    }

    advertisements
}

/// Start scanning for advertisements using raw HCI sockets on hci0.
///
/// # Requirements
/// - CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges
/// - An available HCI device (typically hci0)
pub async fn start_scan() -> Result<mpsc::Receiver<Advertisement>, ScanError> {
    let fd = open_hci_socket(HCI_DEV)?;
    set_hci_filter(&fd)?;

    // Commands go through a separate socket
    let cmd_fd = open_hci_socket(HCI_DEV)?;
    configure_le_scan(&cmd_fd)?;

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    let async_fd = AsyncFd::new(fd)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {}", e)))?;

    tokio::spawn(async move {
        let _cmd_fd = cmd_fd;
        let mut buf = [0u8; HCI_MAX_EVENT_SIZE];

        'events: loop {
            let mut guard = match async_fd.readable().await {
                Ok(guard) => guard,
                Err(e) => {
                    tracing::warn!(error = %e, "HCI socket failed");
                    break;
                }
            };

            // Drain all available packets before waiting again
            loop {
                let n = match guard.try_io(|inner| {
                    let ret = unsafe {
                        libc::read(
                            inner.as_raw_fd(),
                            buf.as_mut_ptr() as *mut c_void,
                            buf.len(),
                        )
                    };
                    if ret < 0 {
                        Err(io::Error::last_os_error())
                    } else {
                        Ok(ret as usize)
                    }
                }) {
                    Ok(Ok(n)) if n > 0 => n,
                    Ok(Ok(_)) => break,
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "HCI read failed");
                        break 'events;
                    }
                    Err(_would_block) => break,
                };

                for advertisement in parse_advertising_report(&buf[..n], SystemTime::now()) {
                    if tx.send(advertisement).await.is_err() {
                        break 'events;
                    }
                }
            }
        }
    });

    Ok(rx)
}
