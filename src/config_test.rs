use super::*;
use std::collections::HashMap;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

#[test]
fn from_lookup_uses_defaults() {
    let cfg = ClientConfig::from_lookup(lookup(&[])).unwrap();
    assert_eq!(cfg, ClientConfig::default());
    assert_eq!(cfg.ws_url().unwrap(), "ws://127.0.0.1:5000/ws");
}

#[test]
fn from_lookup_parses_overrides() {
    let cfg = ClientConfig::from_lookup(lookup(&[
        ("CHATDECK_BASE_URL", "https://bots.example.test/"),
        ("CHATDECK_WS_PATH", "socket"),
        ("CHATDECK_CONNECT_TIMEOUT_SECS", "3"),
        ("CHATDECK_RESPONSE_TIMEOUT_SECS", "30"),
        ("CHATDECK_STORE_PATH", "/tmp/prefs.json"),
    ]))
    .unwrap();

    assert_eq!(cfg.base_url, "https://bots.example.test");
    assert_eq!(cfg.ws_path, "/socket");
    assert_eq!(cfg.connect_timeout, Duration::from_secs(3));
    assert_eq!(cfg.response_timeout, Some(Duration::from_secs(30)));
    assert_eq!(cfg.store_path, PathBuf::from("/tmp/prefs.json"));
    assert_eq!(cfg.ws_url().unwrap(), "wss://bots.example.test/socket");
    assert_eq!(cfg.endpoint("/api/chat/qa"), "https://bots.example.test/api/chat/qa");
}

#[test]
fn zero_response_timeout_disables_it() {
    let cfg = ClientConfig::from_lookup(lookup(&[("CHATDECK_RESPONSE_TIMEOUT_SECS", "0")])).unwrap();
    assert!(cfg.response_timeout.is_none());
}

#[test]
fn unparseable_numbers_fall_back_to_defaults() {
    let cfg = ClientConfig::from_lookup(lookup(&[
        ("CHATDECK_CONNECT_TIMEOUT_SECS", "soon"),
        ("CHATDECK_RESPONSE_TIMEOUT_SECS", "-1"),
    ]))
    .unwrap();
    assert_eq!(cfg.connect_timeout, Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS));
    assert!(cfg.response_timeout.is_none());
}

#[test]
fn non_http_base_url_errors() {
    let err = ClientConfig::from_lookup(lookup(&[("CHATDECK_BASE_URL", "ftp://host")])).unwrap_err();
    assert!(matches!(err, ClientError::InvalidBaseUrl(ref url) if url == "ftp://host"));
}
