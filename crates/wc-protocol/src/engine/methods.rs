/// Static registration table for sign protocol methods.
use crate::relay::PublishOptions;
use crate::types::{FIVE_MINUTES, ONE_DAY, THIRTY_SECONDS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    SessionPropose,
    SessionSettle,
    SessionUpdate,
    SessionExtend,
    SessionRequest,
    SessionEvent,
    SessionDelete,
    SessionPing,
    PairingDelete,
    PairingPing,
}

struct MethodEntry {
    method: Method,
    name: &'static str,
    ttl: u64,
    prompt: bool,
    request_tag: u32,
    response_tag: u32,
}

const fn entry(
    method: Method,
    name: &'static str,
    ttl: u64,
    prompt: bool,
    request_tag: u32,
    response_tag: u32,
) -> MethodEntry {
    MethodEntry {
        method,
        name,
        ttl,
        prompt,
        request_tag,
        response_tag,
    }
}

#[rustfmt::skip]
static METHODS: [MethodEntry; 10] = [
    entry(Method::SessionPropose, "wc_sessionPropose", FIVE_MINUTES,   true,  1100, 1101),
    entry(Method::SessionSettle,  "wc_sessionSettle",  FIVE_MINUTES,   false, 1102, 1103),
    entry(Method::SessionUpdate,  "wc_sessionUpdate",  ONE_DAY,        false, 1104, 1105),
    entry(Method::SessionExtend,  "wc_sessionExtend",  ONE_DAY,        false, 1106, 1107),
    entry(Method::SessionRequest, "wc_sessionRequest", FIVE_MINUTES,   true,  1108, 1109),
    entry(Method::SessionEvent,   "wc_sessionEvent",   FIVE_MINUTES,   true,  1110, 1111),
    entry(Method::SessionDelete,  "wc_sessionDelete",  ONE_DAY,        false, 1112, 1113),
    entry(Method::SessionPing,    "wc_sessionPing",    THIRTY_SECONDS, false, 1114, 1115),
    entry(Method::PairingDelete,  "wc_pairingDelete",  ONE_DAY,        false, 1000, 1001),
    entry(Method::PairingPing,    "wc_pairingPing",    THIRTY_SECONDS, false, 1002, 1003),
];

impl Method {
    fn entry(self) -> &'static MethodEntry {
        // Every variant has exactly one row.
        METHODS
            .iter()
            .find(|s| s.method == self)
            .unwrap_or(&METHODS[0])
    }

    pub fn from_name(name: &str) -> Option<Self> {
        METHODS.iter().find(|s| s.name == name).map(|s| s.method)
    }

    pub fn as_str(self) -> &'static str {
        self.entry().name
    }

    pub fn request_opts(self) -> PublishOptions {
        let entry = self.entry();
        PublishOptions {
            ttl: entry.ttl,
            tag: entry.request_tag,
            prompt: entry.prompt,
        }
    }

    pub fn response_opts(self) -> PublishOptions {
        let entry = self.entry();
        PublishOptions {
            ttl: entry.ttl,
            tag: entry.response_tag,
            prompt: false,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_has_its_own_row() {
        for row in &METHODS {
            assert_eq!(row.method.as_str(), row.name);
            assert_eq!(Method::from_name(row.name), Some(row.method));
        }
        assert_eq!(Method::from_name("wc_unknown"), None);
    }

    #[test]
    fn propose_options() {
        let req = Method::SessionPropose.request_opts();
        assert_eq!((req.ttl, req.tag, req.prompt), (300, 1100, true));
        let res = Method::SessionPropose.response_opts();
        assert_eq!((res.ttl, res.tag, res.prompt), (300, 1101, false));
    }

    #[test]
    fn pairing_options() {
        let ping = Method::PairingPing.request_opts();
        assert_eq!((ping.ttl, ping.tag), (30, 1002));
        let delete = Method::PairingDelete.response_opts();
        assert_eq!((delete.ttl, delete.tag), (86_400, 1001));
        assert_eq!(Method::SessionUpdate.to_string(), "wc_sessionUpdate");
    }
}
