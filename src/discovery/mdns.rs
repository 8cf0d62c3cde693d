//! mDNS/DNS-SD advertiser backend.

use super::Advertiser;
use crate::error::{Error, Result};
use mdns_sd::{ServiceDaemon, ServiceInfo};
use std::collections::HashMap;
use std::thread;

/// Hostname published alongside the service record. Addresses are
/// auto-detected per interface, so the literal only has to be unique-ish.
const HOST_NAME: &str = "tarang-io.local.";

/// Advertiser backed by the `mdns-sd` responder.
pub struct MdnsAdvertiser {
    daemon: ServiceDaemon,
    txt: HashMap<String, String>,
    fullname: Option<String>,
}

impl MdnsAdvertiser {
    /// Start the responder. `txt` becomes the TXT record of every
    /// subsequent registration.
    pub fn new(txt: HashMap<String, String>) -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| Error::Advertiser(e.to_string()))?;

        // Daemon events (registering / collision / failure) are
        // informational only; drain them to the log.
        if let Ok(events) = daemon.monitor() {
            thread::Builder::new()
                .name("tarang.mdns.events".to_string())
                .spawn(move || {
                    while let Ok(event) = events.recv() {
                        log::debug!("mdns daemon event: {:?}", event);
                    }
                })?;
        }

        Ok(MdnsAdvertiser {
            daemon,
            txt,
            fullname: None,
        })
    }
}

impl Advertiser for MdnsAdvertiser {
    fn register(&mut self, name: &str, service_type: &str, port: u16) -> Result<()> {
        let info = ServiceInfo::new(service_type, name, HOST_NAME, "", port, self.txt.clone())
            .map_err(|e| Error::Advertiser(e.to_string()))?
            .enable_addr_auto();
        let fullname = info.get_fullname().to_string();

        self.daemon
            .register(info)
            .map_err(|e| Error::Advertiser(e.to_string()))?;
        self.fullname = Some(fullname);

        log::info!("Zeroconf service registered: {} on port {}", name, port);
        Ok(())
    }

    fn unregister(&mut self) -> Result<()> {
        match self.fullname.take() {
            Some(fullname) => {
                self.daemon
                    .unregister(&fullname)
                    .map_err(|e| Error::Advertiser(e.to_string()))?;
                log::debug!("Zeroconf service unregistered");
                Ok(())
            }
            None => {
                log::debug!("Service already unregistered");
                Ok(())
            }
        }
    }
}

impl Drop for MdnsAdvertiser {
    fn drop(&mut self) {
        let _ = self.unregister();
        let _ = self.daemon.shutdown();
    }
}
