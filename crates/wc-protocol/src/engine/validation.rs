/// Namespace validation, conformance and matching.
///
/// Chains follow CAIP-2 (`namespace:reference`), accounts CAIP-10
/// (`namespace:reference:address`). Granted chains are never stored
/// separately; they derive from account strings.
///
/// Pure logic, no I/O.
use std::collections::{BTreeSet, HashSet};

use super::models::{
    Namespace, NamespaceExtension, Namespaces, RequiredNamespace, RequiredNamespaceExtension,
    RequiredNamespaces,
};
use crate::error::SdkError;
use crate::WalletConnectError;

// ── Identifiers ──────────────────────────────────────────────────────

pub fn is_valid_chain_id(chain: &str) -> bool {
    match chain.split_once(':') {
        Some((ns, reference)) => !ns.is_empty() && !reference.is_empty() && !reference.contains(':'),
        None => false,
    }
}

pub fn is_valid_account(account: &str) -> bool {
    let parts: Vec<&str> = account.split(':').collect();
    parts.len() == 3 && parts.iter().all(|p| !p.is_empty())
}

/// `eip155:1:0xabc` → `eip155:1`.
pub fn chain_of_account(account: &str) -> Option<&str> {
    let (chain, _) = account.rsplit_once(':')?;
    is_valid_chain_id(chain).then_some(chain)
}

fn namespace_of_chain(chain: &str) -> &str {
    chain.split_once(':').map_or(chain, |(ns, _)| ns)
}

fn chains_of_accounts(accounts: &[String]) -> HashSet<&str> {
    accounts.iter().filter_map(|a| chain_of_account(a)).collect()
}

fn contains_all(granted: &[String], required: &[String]) -> bool {
    let granted: HashSet<&str> = granted.iter().map(String::as_str).collect();
    required.iter().all(|r| granted.contains(r.as_str()))
}

// ── Shape validation ─────────────────────────────────────────────────

/// Required namespaces sent with `connect`: non-empty, each chain a valid
/// CAIP-2 id in the namespace named by its key.
pub fn validate_required_namespaces(
    required: &RequiredNamespaces,
    context: &str,
) -> Result<(), WalletConnectError> {
    if required.is_empty() {
        return Err(WalletConnectError::missing(format!("{context} requiredNamespaces")));
    }
    for (key, ns) in required {
        let chains = ns
            .chains
            .iter()
            .chain(ns.extension.iter().flatten().flat_map(|e| e.chains.iter()));
        for chain in chains {
            if !is_valid_chain_id(chain) || namespace_of_chain(chain) != key {
                return Err(SdkError::UnsupportedChains.with_context(format!(
                    "{context}, chain {chain} should conform to \"CAIP-2\" format and belong to {key}"
                )));
            }
        }
        if ns.chains.is_empty() {
            return Err(SdkError::UnsupportedChains
                .with_context(format!("{context}, no chains for namespace {key}")));
        }
    }
    Ok(())
}

/// Namespaces offered on approve or update: non-empty, each account a
/// valid CAIP-10 id in the namespace named by its key.
pub fn validate_namespaces(namespaces: &Namespaces, context: &str) -> Result<(), WalletConnectError> {
    if namespaces.is_empty() {
        return Err(WalletConnectError::missing(format!("{context} namespaces")));
    }
    for (key, ns) in namespaces {
        let accounts = ns
            .accounts
            .iter()
            .chain(ns.extension.iter().flatten().flat_map(|e| e.accounts.iter()));
        for account in accounts {
            let in_namespace = chain_of_account(account).is_some_and(|c| namespace_of_chain(c) == key);
            if !is_valid_account(account) || !in_namespace {
                return Err(SdkError::UnsupportedAccounts.with_context(format!(
                    "{context}, account {account} should conform to \"CAIP-10\" format and belong to {key}"
                )));
            }
        }
    }
    Ok(())
}

// ── Conformance ──────────────────────────────────────────────────────

/// Check that `namespaces` grant everything `required` asks for.
///
/// Keys must match exactly; within each key the accounts must cover
/// every required chain and the methods/events must be supersets.
pub fn validate_conformance(
    required: &RequiredNamespaces,
    namespaces: &Namespaces,
    context: &str,
) -> Result<(), WalletConnectError> {
    let required_keys: BTreeSet<&String> = required.keys().collect();
    let granted_keys: BTreeSet<&String> = namespaces.keys().collect();
    if required_keys != granted_keys {
        return Err(SdkError::UnsupportedNamespaceKey
            .with_context(format!("{context} namespaces keys don't satisfy requiredNamespaces")));
    }

    for (key, req) in required {
        let Some(ns) = namespaces.get(key) else {
            continue;
        };
        conforms(
            &req.chains,
            &req.methods,
            &req.events,
            &ns.accounts,
            &ns.methods,
            &ns.events,
            &format!("{context} namespace {key}"),
        )?;

        let Some(req_exts) = &req.extension else {
            continue;
        };
        let granted_exts = ns.extension.as_deref().unwrap_or_default();
        for req_ext in req_exts {
            let satisfied = granted_exts.iter().any(|ext| {
                conforms(
                    &req_ext.chains,
                    &req_ext.methods,
                    &req_ext.events,
                    &ext.accounts,
                    &ext.methods,
                    &ext.events,
                    "",
                )
                .is_ok()
            });
            if !satisfied {
                return Err(SdkError::UnsupportedNamespaceKey.with_context(format!(
                    "{context} extensions of {key} don't satisfy requiredNamespaces"
                )));
            }
        }
    }
    Ok(())
}

fn conforms(
    req_chains: &[String],
    req_methods: &[String],
    req_events: &[String],
    accounts: &[String],
    methods: &[String],
    events: &[String],
    context: &str,
) -> Result<(), WalletConnectError> {
    let chains = chains_of_accounts(accounts);
    if !req_chains.iter().all(|c| chains.contains(c.as_str())) {
        return Err(SdkError::UnsupportedChains
            .with_context(format!("{context} accounts don't satisfy requiredNamespaces chains")));
    }
    if !contains_all(methods, req_methods) {
        return Err(SdkError::UnsupportedMethods
            .with_context(format!("{context} methods don't satisfy requiredNamespaces methods")));
    }
    if !contains_all(events, req_events) {
        return Err(SdkError::UnsupportedEvents
            .with_context(format!("{context} events don't satisfy requiredNamespaces events")));
    }
    Ok(())
}

/// Build approval namespaces granting `<chain>:<address>` on every
/// required chain with exactly the required methods and events.
pub fn namespaces_from_required(required: &RequiredNamespaces, address: &str) -> Namespaces {
    let accounts = |chains: &[String]| -> Vec<String> {
        chains.iter().map(|c| format!("{c}:{address}")).collect()
    };

    required
        .iter()
        .map(|(key, req)| {
            let extension = req.extension.as_ref().map(|exts| {
                exts.iter()
                    .map(|ext: &RequiredNamespaceExtension| NamespaceExtension {
                        accounts: accounts(&ext.chains),
                        methods: ext.methods.clone(),
                        events: ext.events.clone(),
                    })
                    .collect()
            });
            let namespace = Namespace {
                accounts: accounts(&req.chains),
                methods: req.methods.clone(),
                events: req.events.clone(),
                extension,
            };
            (key.clone(), namespace)
        })
        .collect()
}

// ── Matching ─────────────────────────────────────────────────────────

/// Whether `namespaces` grant at least `required`: every required key is
/// present and its chains/methods/events are contained in the grant.
pub fn is_superset(namespaces: &Namespaces, required: &RequiredNamespaces) -> bool {
    required.iter().all(|(key, req)| {
        let Some(ns) = namespaces.get(key) else {
            return false;
        };
        if !grants(&ns.accounts, &ns.methods, &ns.events, req) {
            return false;
        }
        let Some(req_exts) = &req.extension else {
            return true;
        };
        let exts = ns.extension.as_deref().unwrap_or_default();
        req_exts.iter().all(|req_ext| {
            exts.iter().any(|ext| {
                let chains = chains_of_accounts(&ext.accounts);
                req_ext.chains.iter().all(|c| chains.contains(c.as_str()))
                    && contains_all(&ext.methods, &req_ext.methods)
                    && contains_all(&ext.events, &req_ext.events)
            })
        })
    })
}

fn grants(accounts: &[String], methods: &[String], events: &[String], req: &RequiredNamespace) -> bool {
    let chains = chains_of_accounts(accounts);
    req.chains.iter().all(|c| chains.contains(c.as_str()))
        && contains_all(methods, &req.methods)
        && contains_all(events, &req.events)
}

// ── Authorization ────────────────────────────────────────────────────

/// Grants (base and extensions) whose accounts cover `chain_id`.
fn grants_on_chain<'a>(
    namespaces: &'a Namespaces,
    chain_id: &str,
) -> impl Iterator<Item = (&'a [String], &'a [String])> + 'a {
    let chain_id = chain_id.to_string();
    namespaces.values().flat_map(move |ns| {
        let base = std::iter::once((
            ns.accounts.as_slice(),
            ns.methods.as_slice(),
            ns.events.as_slice(),
        ));
        let exts = ns
            .extension
            .iter()
            .flatten()
            .map(|e| (e.accounts.as_slice(), e.methods.as_slice(), e.events.as_slice()));
        let chain_id = chain_id.clone();
        base.chain(exts)
            .filter(move |(accounts, _, _)| chains_of_accounts(accounts).contains(chain_id.as_str()))
            .map(|(_, methods, events)| (methods, events))
    })
}

pub fn is_authorized_chain(namespaces: &Namespaces, chain_id: &str) -> bool {
    grants_on_chain(namespaces, chain_id).next().is_some()
}

pub fn is_authorized_method(namespaces: &Namespaces, chain_id: &str, method: &str) -> bool {
    grants_on_chain(namespaces, chain_id).any(|(methods, _)| methods.iter().any(|m| m == method))
}

pub fn is_authorized_event(namespaces: &Namespaces, chain_id: &str, event: &str) -> bool {
    grants_on_chain(namespaces, chain_id).any(|(_, events)| events.iter().any(|e| e == event))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS: &str = "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045";

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn required(chains: &[&str], methods: &[&str], events: &[&str]) -> RequiredNamespaces {
        let mut map = RequiredNamespaces::new();
        map.insert(
            "eip155".into(),
            RequiredNamespace {
                chains: strings(chains),
                methods: strings(methods),
                events: strings(events),
                extension: None,
            },
        );
        map
    }

    #[test]
    fn identifiers() {
        assert!(is_valid_chain_id("eip155:1"));
        assert!(!is_valid_chain_id("eip155"));
        assert!(!is_valid_chain_id(":1"));
        assert!(is_valid_account(&format!("eip155:1:{ADDRESS}")));
        assert!(!is_valid_account("eip155:1"));
        assert_eq!(chain_of_account("eip155:1:0xabc"), Some("eip155:1"));
        assert_eq!(chain_of_account("bad"), None);
    }

    #[test]
    fn required_namespaces_shape() {
        assert!(validate_required_namespaces(&required(&["eip155:1"], &[], &[]), "connect()").is_ok());
        assert_eq!(
            validate_required_namespaces(&RequiredNamespaces::new(), "connect()")
                .unwrap_err()
                .code(),
            5
        );
        let err = validate_required_namespaces(&required(&["cosmos:hub"], &[], &[]), "connect()")
            .unwrap_err();
        assert_eq!(err.code(), 5100);
    }

    #[test]
    fn built_namespaces_conform() {
        let req = required(&["eip155:1", "eip155:10"], &["eth_sign"], &["accountsChanged"]);
        let namespaces = namespaces_from_required(&req, ADDRESS);
        assert_eq!(
            namespaces["eip155"].accounts,
            vec![format!("eip155:1:{ADDRESS}"), format!("eip155:10:{ADDRESS}")]
        );
        validate_namespaces(&namespaces, "approve()").unwrap();
        validate_conformance(&req, &namespaces, "approve()").unwrap();
        assert!(is_superset(&namespaces, &req));
    }

    #[test]
    fn conformance_errors() {
        let req = required(&["eip155:1"], &["eth_sign"], &["chainChanged"]);

        let mut missing_chain = namespaces_from_required(&req, ADDRESS);
        missing_chain.get_mut("eip155").unwrap().accounts = strings(&["eip155:5:0x1"]);
        assert_eq!(
            validate_conformance(&req, &missing_chain, "approve()").unwrap_err().code(),
            5100
        );

        let mut missing_method = namespaces_from_required(&req, ADDRESS);
        missing_method.get_mut("eip155").unwrap().methods.clear();
        assert_eq!(
            validate_conformance(&req, &missing_method, "approve()").unwrap_err().code(),
            5101
        );

        let mut missing_event = namespaces_from_required(&req, ADDRESS);
        missing_event.get_mut("eip155").unwrap().events.clear();
        assert_eq!(
            validate_conformance(&req, &missing_event, "approve()").unwrap_err().code(),
            5102
        );

        let mut extra_key = namespaces_from_required(&req, ADDRESS);
        extra_key.insert("cosmos".into(), Namespace::default());
        assert_eq!(
            validate_conformance(&req, &extra_key, "approve()").unwrap_err().code(),
            5104
        );
    }

    #[test]
    fn superset_matching() {
        let granted = namespaces_from_required(&required(&["eip155:1"], &["eth_sign"], &[]), ADDRESS);
        assert!(is_superset(&granted, &required(&["eip155:1"], &["eth_sign"], &[])));
        assert!(is_superset(&granted, &required(&["eip155:1"], &[], &[])));
        assert!(!is_superset(
            &granted,
            &required(&["eip155:1"], &["eth_sign", "personal_sign"], &[])
        ));
        assert!(!is_superset(&granted, &required(&["eip155:5"], &["eth_sign"], &[])));
    }

    #[test]
    fn extensions_match_analogously() {
        let mut req = required(&["eip155:1"], &["eth_sign"], &[]);
        req.get_mut("eip155").unwrap().extension = Some(vec![RequiredNamespaceExtension {
            chains: strings(&["eip155:137"]),
            methods: strings(&["personal_sign"]),
            events: vec![],
        }]);
        let granted = namespaces_from_required(&req, ADDRESS);
        assert!(is_superset(&granted, &req));
        validate_conformance(&req, &granted, "approve()").unwrap();

        assert!(is_authorized_method(&granted, "eip155:137", "personal_sign"));
        assert!(!is_authorized_method(&granted, "eip155:1", "personal_sign"));

        let base_only = required(&["eip155:1"], &["eth_sign"], &[]);
        let granted_base = namespaces_from_required(&base_only, ADDRESS);
        assert!(!is_superset(&granted_base, &req));
    }

    #[test]
    fn authorization() {
        let granted = namespaces_from_required(
            &required(&["eip155:1"], &["eth_sign"], &["accountsChanged"]),
            ADDRESS,
        );
        assert!(is_authorized_chain(&granted, "eip155:1"));
        assert!(!is_authorized_chain(&granted, "eip155:5"));
        assert!(is_authorized_method(&granted, "eip155:1", "eth_sign"));
        assert!(!is_authorized_method(&granted, "eip155:1", "eth_sendTransaction"));
        assert!(is_authorized_event(&granted, "eip155:1", "accountsChanged"));
        assert!(!is_authorized_event(&granted, "eip155:5", "accountsChanged"));
    }
}
