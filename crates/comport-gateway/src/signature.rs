use std::fmt;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use tracing::debug;

/// Address used only to pick the outbound interface; nothing is sent.
const PROBE_ADDR: &str = "192.0.2.1:9";

/// Identity of one gateway instance: `hostIP:devicePath`.
///
/// Scopes every bus name the gateway uses: the inbound command channel,
/// the `-send`/`-read` keys and the presence set member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionSignature {
    host: String,
    device: String,
}

impl ConnectionSignature {
    pub fn new(host: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            device: device.into(),
        }
    }

    /// Signature for `device` on this machine's outbound address.
    pub fn discover(device: impl Into<String>) -> Self {
        Self::new(host_ip().to_string(), device)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Channel on which commands for this device arrive.
    pub fn channel(&self) -> String {
        self.to_string()
    }

    /// Key mirroring the last command sent.
    pub fn send_key(&self) -> String {
        format!("{self}-send")
    }

    /// Key holding the last decoded frame.
    pub fn read_key(&self) -> String {
        format!("{self}-read")
    }
}

impl fmt::Display for ConnectionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.device)
    }
}

/// Primary IPv4 address of this host, or `127.0.0.1` if none is routable.
///
/// Connecting a UDP socket sends no packets but makes the OS choose the
/// interface it would route through.
pub fn host_ip() -> IpAddr {
    let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let probe = UdpSocket::bind("0.0.0.0:0")
        .and_then(|sock| sock.connect(PROBE_ADDR).map(|()| sock))
        .and_then(|sock| sock.local_addr());
    match probe {
        Ok(addr) if !addr.ip().is_unspecified() => addr.ip(),
        Ok(_) => localhost,
        Err(err) => {
            debug!(error = %err, "host address discovery failed, using localhost");
            localhost
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_scoped_by_signature() {
        let sig = ConnectionSignature::new("10.0.0.2", "/dev/ttyUSB0");
        assert_eq!(sig.to_string(), "10.0.0.2:/dev/ttyUSB0");
        assert_eq!(sig.channel(), "10.0.0.2:/dev/ttyUSB0");
        assert_eq!(sig.send_key(), "10.0.0.2:/dev/ttyUSB0-send");
        assert_eq!(sig.read_key(), "10.0.0.2:/dev/ttyUSB0-read");
    }

    #[test]
    fn discovered_host_is_ipv4() {
        let sig = ConnectionSignature::discover("/dev/arduino");
        assert!(sig.host().parse::<Ipv4Addr>().is_ok());
        assert_eq!(sig.device(), "/dev/arduino");
    }
}
