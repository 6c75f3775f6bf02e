//! The device registry.
//!
//! One `Gateway` per process owns the configured device set, the shared
//! SMS database and the supervisor threads. Devices that drop to
//! `Disconnected` are restarted on the discovery cadence as long as their
//! desired state remains `Started`; removal tears the device down and
//! forgets it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::config::{DeviceConfig, GlobalConfig, InitialState, SharedConfig};
use crate::device::{Device, DeviceState};
use crate::error::{Error, Result};
use crate::events::EventSink;
use crate::monitor::{self, SerialPort};
use crate::smsdb::SmsDb;

struct Slot {
    device: Arc<Mutex<Device>>,
    cfg: DeviceConfig,
    shared: SharedConfig,
    desired: InitialState,
    monitor: Option<std::thread::JoinHandle<()>>,
}

pub struct Gateway {
    global: GlobalConfig,
    smsdb: Arc<SmsDb>,
    sink: Arc<dyn EventSink>,
    slots: Mutex<HashMap<String, Slot>>,
    last_discovery: Mutex<Instant>,
}

impl Gateway {
    pub fn new(global: GlobalConfig, sink: Arc<dyn EventSink>) -> Result<Gateway> {
        let smsdb = Arc::new(SmsDb::open(&global.smsdb_path, global.csms_ttl_seconds)?);
        Ok(Gateway {
            global,
            smsdb,
            sink,
            slots: Mutex::new(HashMap::new()),
            last_discovery: Mutex::new(Instant::now()),
        })
    }

    pub fn smsdb(&self) -> Arc<SmsDb> {
        self.smsdb.clone()
    }

    /// Register a configured device. Devices configured `started` get
    /// their supervisor immediately.
    pub fn add_device(&self, cfg: DeviceConfig, shared: SharedConfig) -> Result<()> {
        let id = cfg.id.clone();
        let mut slots = self.slots.lock().unwrap();
        if slots.contains_key(&id) {
            return Err(Error::Unknown);
        }

        let desired = cfg.initial_state;
        let mut slot = Slot {
            device: Arc::new(Mutex::new(Device::new(
                cfg.clone(),
                shared.clone(),
                Box::new(std::io::sink()),
                self.sink.clone(),
                self.smsdb.clone(),
            ))),
            cfg,
            shared,
            desired,
            monitor: None,
        };

        if desired == InitialState::Started {
            if let Err(e) = start_slot(&mut slot, self.sink.clone(), self.smsdb.clone()) {
                warn!("[{}] unable to start device: {}", id, e);
            }
        }

        slots.insert(id, slot);
        Ok(())
    }

    /// Look up a device for direct operation calls.
    pub fn device(&self, id: &str) -> Result<Arc<Mutex<Device>>> {
        let slots = self.slots.lock().unwrap();
        let slot = slots.get(id).ok_or(Error::DeviceNotFound)?;
        Ok(slot.device.clone())
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.slots.lock().unwrap().keys().cloned().collect()
    }

    /// Bring a stopped or disconnected device up.
    pub fn start_device(&self, id: &str) -> Result<()> {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.get_mut(id).ok_or(Error::DeviceNotFound)?;
        slot.desired = InitialState::Started;
        if slot.device.lock().unwrap().state() == DeviceState::Started {
            return Ok(());
        }
        start_slot(slot, self.sink.clone(), self.smsdb.clone())
    }

    /// Request a stop; the supervisor winds the device down to `Stopped`.
    pub fn stop_device(&self, id: &str) -> Result<()> {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.get_mut(id).ok_or(Error::DeviceNotFound)?;
        slot.desired = InitialState::Stopped;
        monitor::request_stop(&slot.device);
        if let Some(handle) = slot.monitor.take() {
            drop(slots);
            handle.join().ok();
            let slots = self.slots.lock().unwrap();
            if let Some(slot) = slots.get(id) {
                slot.device.lock().unwrap().terminate_monitor = false;
            }
        }
        Ok(())
    }

    /// Stop and forget a device.
    pub fn remove_device(&self, id: &str) -> Result<()> {
        self.stop_device(id)?;
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.remove(id).ok_or(Error::DeviceNotFound)?;
        slot.device.lock().unwrap().set_device_state(DeviceState::Removed);
        info!("[{}] device removed", id);
        Ok(())
    }

    /// Restart supervisors of devices that fell off the bus. Call this on
    /// the host's idle cadence; it rate-limits itself to the configured
    /// discovery interval.
    pub fn discovery_tick(&self) {
        {
            let mut last = self.last_discovery.lock().unwrap();
            let interval = Duration::from_secs(self.global.discovery_interval_seconds as u64);
            if last.elapsed() < interval {
                return;
            }
            *last = Instant::now();
        }

        let mut slots = self.slots.lock().unwrap();
        for (id, slot) in slots.iter_mut() {
            if slot.desired != InitialState::Started {
                continue;
            }
            let state = slot.device.lock().unwrap().state();
            if state != DeviceState::Disconnected {
                continue;
            }
            if let Some(handle) = slot.monitor.take() {
                if !handle.is_finished() {
                    slot.monitor = Some(handle);
                    continue;
                }
                handle.join().ok();
            }
            info!("[{}] restarting after disconnect", id);
            if let Err(e) = start_slot(slot, self.sink.clone(), self.smsdb.clone()) {
                warn!("[{}] restart failed: {}", id, e);
            }
        }
    }

    /// Stop everything; called at module unload.
    pub fn shutdown(&self) {
        let ids = self.device_ids();
        for id in ids {
            self.stop_device(&id).ok();
        }
    }
}

fn start_slot(slot: &mut Slot, sink: Arc<dyn EventSink>, smsdb: Arc<SmsDb>) -> Result<()> {
    let (port, writer) = SerialPort::open(&slot.cfg.data_tty, false)?;

    // A fresh device keeps event history and counters out of the old run.
    let device = Arc::new(Mutex::new(Device::new(
        slot.cfg.clone(),
        slot.shared.clone(),
        writer,
        sink,
        smsdb,
    )));
    slot.device = device.clone();
    slot.monitor = Some(monitor::spawn(device, Box::new(port)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullSink;

    fn gateway() -> Gateway {
        Gateway::new(GlobalConfig::default(), Arc::new(NullSink)).unwrap()
    }

    fn cfg(id: &str) -> DeviceConfig {
        DeviceConfig {
            id: id.to_string(),
            data_tty: "/dev/null-nonexistent".to_string(),
            audio_tty: None,
            imei: None,
            imsi: None,
            initial_state: InitialState::Stopped,
        }
    }

    #[test]
    fn add_and_lookup() {
        let gw = gateway();
        gw.add_device(cfg("m0"), SharedConfig::default()).unwrap();
        assert!(gw.device("m0").is_ok());
        assert_eq!(gw.device("m1").err(), Some(Error::DeviceNotFound));
        assert_eq!(gw.device_ids(), vec!["m0".to_string()]);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let gw = gateway();
        gw.add_device(cfg("m0"), SharedConfig::default()).unwrap();
        assert!(gw.add_device(cfg("m0"), SharedConfig::default()).is_err());
    }

    #[test]
    fn stopped_device_stays_down() {
        let gw = gateway();
        gw.add_device(cfg("m0"), SharedConfig::default()).unwrap();
        let dev = gw.device("m0").unwrap();
        assert_eq!(dev.lock().unwrap().state(), DeviceState::Stopped);
    }

    #[test]
    fn remove_forgets() {
        let gw = gateway();
        gw.add_device(cfg("m0"), SharedConfig::default()).unwrap();
        gw.remove_device("m0").unwrap();
        assert!(gw.device("m0").is_err());
    }
}
