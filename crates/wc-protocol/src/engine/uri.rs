/// Pairing URI: `wc:<topic>@2?symKey=<hex>&relay-protocol=<p>[&relay-data=<d>]`.
use url::form_urlencoded;

use super::models::RelayProtocolOptions;
use crate::types::{PROTOCOL, VERSION};
use crate::WalletConnectError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingUri {
    pub topic: String,
    pub version: u32,
    pub sym_key: String,
    pub relay: RelayProtocolOptions,
}

impl PairingUri {
    pub fn new(topic: impl Into<String>, sym_key: impl Into<String>, relay: RelayProtocolOptions) -> Self {
        Self {
            topic: topic.into(),
            version: VERSION,
            sym_key: sym_key.into(),
            relay,
        }
    }

    pub fn format(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("symKey", &self.sym_key);
        query.append_pair("relay-protocol", &self.relay.protocol);
        if let Some(data) = &self.relay.data {
            query.append_pair("relay-data", data);
        }
        format!(
            "{PROTOCOL}:{}@{}?{}",
            self.topic,
            self.version,
            query.finish()
        )
    }

    pub fn parse(uri: &str) -> Result<Self, WalletConnectError> {
        let invalid = |what: &str| WalletConnectError::missing(format!("pair() uri: {what}"));

        let rest = uri
            .strip_prefix(PROTOCOL)
            .and_then(|r| r.strip_prefix(':'))
            .ok_or_else(|| invalid("protocol"))?;
        let (path, query) = rest.split_once('?').ok_or_else(|| invalid("query"))?;
        let (topic, version) = path.split_once('@').ok_or_else(|| invalid("version"))?;
        if topic.is_empty() {
            return Err(invalid("topic"));
        }
        let version: u32 = version.parse().map_err(|_| invalid("version"))?;

        let mut sym_key = None;
        let mut protocol = None;
        let mut data = None;
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "symKey" => sym_key = Some(value.into_owned()),
                "relay-protocol" => protocol = Some(value.into_owned()),
                "relay-data" => data = Some(value.into_owned()),
                _ => {}
            }
        }

        Ok(Self {
            topic: topic.to_string(),
            version,
            sym_key: sym_key.ok_or_else(|| invalid("symKey"))?,
            relay: RelayProtocolOptions {
                protocol: protocol.ok_or_else(|| invalid("relay-protocol"))?,
                data,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_and_parse() {
        let uri = PairingUri::new("abc123", "ff00", RelayProtocolOptions::default());
        let text = uri.format();
        assert_eq!(text, "wc:abc123@2?symKey=ff00&relay-protocol=irn");
        assert_eq!(PairingUri::parse(&text).unwrap(), uri);
    }

    #[test]
    fn relay_data_is_carried() {
        let relay = RelayProtocolOptions {
            protocol: "irn".into(),
            data: Some("a b&c".into()),
        };
        let uri = PairingUri::new("t", "k", relay.clone());
        let parsed = PairingUri::parse(&uri.format()).unwrap();
        assert_eq!(parsed.relay, relay);
    }

    #[test]
    fn rejects_malformed() {
        for bad in [
            "http://x",
            "wc:topic@2",
            "wc:@2?symKey=k&relay-protocol=irn",
            "wc:topic@x?symKey=k&relay-protocol=irn",
            "wc:topic@2?relay-protocol=irn",
            "wc:topic@2?symKey=k",
        ] {
            assert!(
                matches!(PairingUri::parse(bad), Err(WalletConnectError::MissingOrInvalid { .. })),
                "{bad}"
            );
        }
    }
}
