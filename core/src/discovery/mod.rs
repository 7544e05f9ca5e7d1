//! mDNS service discovery for finding peers on the local network

mod scan;

pub use scan::{probe, resolve_target, scan, ScanTarget};

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;

use crate::peers::PeerObservation;
use crate::protocol::constants::{PROTOCOL_VERSION, SERVICE_TYPE};
use crate::{Error, Result};

/// Event from the discovery service
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    Found(PeerObservation),
    /// Device id whose record was withdrawn
    Lost(String),
}

/// mDNS advertiser and browser
pub struct DiscoveryService {
    daemon: ServiceDaemon,
    registered: Option<String>,
}

impl DiscoveryService {
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| Error::Discovery(e.to_string()))?;

        Ok(Self {
            daemon,
            registered: None,
        })
    }

    /// Advertise this device, replacing any previous advertisement
    pub fn register(
        &mut self,
        device_id: &str,
        hostname: &str,
        network_name: &str,
        port: u16,
    ) -> Result<()> {
        self.unregister();

        let mut properties = HashMap::new();
        properties.insert("id".to_string(), device_id.to_string());
        properties.insert("host".to_string(), hostname.to_string());
        properties.insert("n".to_string(), network_name.to_string());
        properties.insert("v".to_string(), PROTOCOL_VERSION.to_string());

        let service = ServiceInfo::new(
            SERVICE_TYPE,
            device_id,
            &format!("{}.local.", mdns_host_label(hostname)),
            (),
            port,
            properties,
        )
        .map_err(|e| Error::Discovery(e.to_string()))?
        .enable_addr_auto();

        let fullname = service.get_fullname().to_string();
        self.daemon
            .register(service)
            .map_err(|e| Error::Discovery(e.to_string()))?;

        tracing::info!("registered mDNS service {} on network {}", fullname, network_name);
        self.registered = Some(fullname);
        Ok(())
    }

    /// Withdraw the advertisement, if any
    pub fn unregister(&mut self) {
        if let Some(fullname) = self.registered.take() {
            if let Err(e) = self.daemon.unregister(&fullname) {
                tracing::debug!("failed to unregister {}: {}", fullname, e);
            }
        }
    }

    /// Browse for other devices. Records without an `id` are ignored; the
    /// caller filters out its own id.
    pub fn browse(&self) -> Result<mpsc::Receiver<DiscoveryEvent>> {
        let (tx, rx) = mpsc::channel(32);

        let receiver = self
            .daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| Error::Discovery(e.to_string()))?;

        tokio::task::spawn_blocking(move || {
            while let Ok(event) = receiver.recv() {
                let mapped = match event {
                    ServiceEvent::ServiceResolved(info) => observation(&info).map(DiscoveryEvent::Found),
                    ServiceEvent::ServiceRemoved(_, fullname) => {
                        instance_id(&fullname).map(DiscoveryEvent::Lost)
                    }
                    _ => None,
                };

                if let Some(event) = mapped {
                    if tx.blocking_send(event).is_err() {
                        break;
                    }
                }
            }
            tracing::debug!("mDNS browse stopped");
        });

        Ok(rx)
    }

    pub fn shutdown(mut self) -> Result<()> {
        self.unregister();
        self.daemon
            .shutdown()
            .map_err(|e| Error::Discovery(e.to_string()))?;
        Ok(())
    }
}

fn observation(info: &ServiceInfo) -> Option<PeerObservation> {
    let props = info.get_properties();
    let id = props.get("id").map(|v| v.val_str().to_string())?;
    if id.is_empty() {
        return None;
    }

    let addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
    let ip = addresses
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addresses.first())
        .copied()?;

    Some(PeerObservation {
        id,
        address: SocketAddr::new(ip, info.get_port()),
        hostname: props
            .get("host")
            .map(|v| v.val_str().to_string())
            .unwrap_or_default(),
        network_name: props.get("n").map(|v| v.val_str().to_string()),
        manual: false,
    })
}

/// `<device id>._clusterclip._tcp.local.` -> device id
fn instance_id(fullname: &str) -> Option<String> {
    fullname
        .strip_suffix(SERVICE_TYPE)
        .and_then(|rest| rest.strip_suffix('.'))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Hostnames may contain anything; mDNS host labels may not
fn mdns_host_label(hostname: &str) -> String {
    let label: String = hostname
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    let label = label.trim_matches('-');
    if label.is_empty() {
        "clusterclip".to_string()
    } else {
        label.to_string()
    }
}

/// Get local IP addresses (non-loopback)
pub fn get_local_ips() -> Vec<IpAddr> {
    let mut ips = Vec::new();

    if let Ok(interfaces) = get_if_addrs::get_if_addrs() {
        for iface in interfaces {
            if !iface.is_loopback() {
                ips.push(iface.ip());
            }
        }
    }

    ips
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_from_fullname() {
        let id = "6f1c2d9e-0000-4000-8000-000000000000";
        let fullname = format!("{}.{}", id, SERVICE_TYPE);
        assert_eq!(instance_id(&fullname).as_deref(), Some(id));
        assert_eq!(instance_id("other._http._tcp.local."), None);
        assert_eq!(instance_id(SERVICE_TYPE), None);
    }

    #[test]
    fn test_mdns_host_label() {
        assert_eq!(mdns_host_label("Jane's MacBook Pro"), "Jane-s-MacBook-Pro");
        assert_eq!(mdns_host_label("..."), "clusterclip");
    }

    #[test]
    fn test_local_ips_exclude_loopback() {
        assert!(get_local_ips().iter().all(|ip| !ip.is_loopback()));
    }
}
