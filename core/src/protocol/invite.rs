//! Join invites shared as a URL or QR code

use std::net::{IpAddr, SocketAddr};

use crate::protocol::constants::INVITE_URL_PREFIX;
use crate::{Error, Result};

/// Everything a new device needs to find a member and pair with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinInvite {
    pub host: IpAddr,
    pub port: u16,
    pub network_name: String,
    pub pin: String,
}

impl JoinInvite {
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Encode as a URL for QR code
    pub fn to_url(&self) -> String {
        format!(
            "{}h={}&p={}&n={}&k={}",
            INVITE_URL_PREFIX,
            urlencoding::encode(&self.host.to_string()),
            self.port,
            urlencoding::encode(&self.network_name),
            urlencoding::encode(&self.pin),
        )
    }

    /// Parse from URL
    pub fn from_url(url: &str) -> Result<Self> {
        let query = url
            .strip_prefix(INVITE_URL_PREFIX)
            .ok_or_else(|| Error::InvalidMessage("invalid scheme".to_string()))?;

        let mut host = None;
        let mut port = None;
        let mut network_name = None;
        let mut pin = None;

        for part in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::InvalidMessage(format!("invalid param: {}", part)))?;
            let value = urlencoding::decode(value)
                .map_err(|_| Error::InvalidMessage(format!("invalid encoding for {}", key)))?;

            match key {
                "h" => {
                    host = Some(value.parse::<IpAddr>().map_err(|_| {
                        Error::InvalidMessage(format!("invalid host: {}", value))
                    })?)
                }
                "p" => {
                    port = Some(value.parse::<u16>().map_err(|_| {
                        Error::InvalidMessage(format!("invalid port: {}", value))
                    })?)
                }
                "n" => network_name = Some(value.into_owned()),
                "k" => pin = Some(value.into_owned()),
                _ => {}
            }
        }

        Ok(Self {
            host: host.ok_or_else(|| Error::InvalidMessage("missing host".to_string()))?,
            port: port.ok_or_else(|| Error::InvalidMessage("missing port".to_string()))?,
            network_name: network_name
                .ok_or_else(|| Error::InvalidMessage("missing network name".to_string()))?,
            pin: pin.ok_or_else(|| Error::InvalidMessage("missing pin".to_string()))?,
        })
    }
}
