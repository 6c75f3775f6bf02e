//! # Quectel cellular
//!
//! Channel-driver core for Quectel and SIMCom USB cellular modems speaking
//! the AT command set: voice calls, SMS (including multipart reassembly
//! and delivery-report tracking) and USSD over one serial data channel.
//!
//! The crate owns the modem side of the problem — the serialized command
//! queue, the reply framer and classifier, the per-command response
//! handlers, the call state machine, the PDU codec and the persistent SMS
//! store. The host telephony framework stays outside: it receives
//! [`events::Event`]s through an [`events::EventSink`] and drives the
//! device through the public methods of [`device::Device`].
//!
//! ## Wiring it up
//!
//! One [`device::Device`] per modem, shared between the host and the
//! supervisor thread:
//!
//! ```ignore
//! let smsdb = Arc::new(SmsDb::open(&global.smsdb_path, global.csms_ttl_seconds)?);
//! let (port, writer) = monitor::SerialPort::open(&cfg.data_tty, false)?;
//! let device = Arc::new(Mutex::new(Device::new(cfg, shared, writer, sink, smsdb)));
//! let handle = monitor::spawn(device.clone(), Box::new(port));
//!
//! device.lock().unwrap().send_sms("+12025550100", "hi", 15, false)?;
//! ```
//!
//! Every public operation enqueues AT commands and returns; results and
//! unsolicited activity surface as events.

pub mod at;
pub mod call;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod gateway;
pub mod modules;
pub mod monitor;
pub mod pdu;
pub mod rb;
pub mod registration;
pub mod smsdb;

pub use call::{CallDir, CallId, CallState, HangupCause};
pub use config::{DeviceConfig, GlobalConfig, SharedConfig};
pub use device::{Device, DeviceState};
pub use error::{Error, Result};
pub use events::{Event, EventSink};
pub use gateway::Gateway;
pub use smsdb::SmsDb;
