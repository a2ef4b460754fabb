//! Broker addresses and the rumqttc transport they imply.

use anyhow::{anyhow, bail, Context, Result};
use rumqttc::Transport;
use std::path::Path;

const PLAIN_PORT: u16 = 1883;
const TLS_PORT: u16 = 8883;

/// Where the label publisher connects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerAddress {
    /// Parse `host[:port]`, `mqtt://host[:port]` or `mqtts://host[:port]`.
    ///
    /// A bare address uses TLS only when `force_tls` is set. The port
    /// defaults to 1883, or 8883 with TLS.
    pub fn parse(addr: &str, force_tls: bool) -> Result<Self> {
        let addr = addr.trim();
        let (tls, rest) = match addr.split_once("://") {
            Some(("mqtt", rest)) => (force_tls, rest),
            Some(("mqtts", rest)) => (true, rest),
            Some((scheme, _)) => bail!("broker scheme must be mqtt or mqtts, got {}", scheme),
            None => (force_tls, addr),
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .with_context(|| format!("invalid broker port in {}", addr))?;
                (host, port)
            }
            None if tls => (rest, TLS_PORT),
            None => (rest, PLAIN_PORT),
        };
        if host.is_empty() || host.contains('/') {
            return Err(anyhow!("invalid broker host in {}", addr));
        }
        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }

    /// Plain TCP, or rustls with system roots unless `ca_path` names a CA
    /// bundle.
    pub fn transport(&self, ca_path: Option<&Path>) -> Result<Transport> {
        match (self.tls, ca_path) {
            (false, None) => Ok(Transport::tcp()),
            (false, Some(path)) => Err(anyhow!(
                "mqtt.ca_path {} is set but {}:{} is not a TLS broker",
                path.display(),
                self.host,
                self.port
            )),
            (true, None) => Ok(Transport::tls_with_default_config()),
            (true, Some(path)) => {
                let ca = std::fs::read(path)
                    .with_context(|| format!("read broker CA {}", path.display()))?;
                Ok(Transport::tls(ca, None, None))
            }
        }
    }
}

impl std::fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.tls { "mqtts" } else { "mqtt" };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_follows_scheme() -> Result<()> {
        assert_eq!(
            BrokerAddress::parse("mqtt://broker.lan", false)?,
            BrokerAddress {
                host: "broker.lan".into(),
                port: 1883,
                tls: false
            }
        );
        assert_eq!(BrokerAddress::parse("mqtts://broker.lan", false)?.port, 8883);
        assert_eq!(BrokerAddress::parse("broker.lan", true)?.port, 8883);
        assert_eq!(
            BrokerAddress::parse("127.0.0.1:1884", false)?.to_string(),
            "mqtt://127.0.0.1:1884"
        );
        Ok(())
    }

    #[test]
    fn rejects_bad_addresses() {
        assert!(BrokerAddress::parse("ws://broker:80", false).is_err());
        assert!(BrokerAddress::parse("broker:notaport", false).is_err());
        assert!(BrokerAddress::parse(":1883", false).is_err());
        assert!(BrokerAddress::parse("mqtt://", false).is_err());
    }

    #[test]
    fn ca_bundle_requires_tls() -> Result<()> {
        let plain = BrokerAddress::parse("broker:1883", false)?;
        assert!(plain.transport(None).is_ok());
        assert!(plain.transport(Some(Path::new("/etc/ca.pem"))).is_err());

        let tls = BrokerAddress::parse("mqtts://broker", false)?;
        assert!(tls.transport(None).is_ok());
        assert!(tls.transport(Some(Path::new("/nonexistent/ca.pem"))).is_err());
        Ok(())
    }
}
