use super::*;

fn temp_path() -> PathBuf {
    std::env::temp_dir().join(format!("chatdeck-store-{}.json", uuid::Uuid::new_v4()))
}

#[test]
fn missing_file_opens_empty_with_defaults() {
    let store = LocalStore::open(temp_path()).unwrap();
    assert_eq!(store.theme(), Theme::Light);
    assert!(store.profile().is_none());
}

#[test]
fn theme_persists_across_reopen() {
    let path = temp_path();
    let mut store = LocalStore::open(&path).unwrap();
    store.set_theme(Theme::Dark).unwrap();

    let reopened = LocalStore::open(&path).unwrap();
    assert_eq!(reopened.theme(), Theme::Dark);

    let raw = std::fs::read_to_string(&path).unwrap();
    let json: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json[THEME_KEY], "dark");

    let _ = std::fs::remove_file(path);
}

#[test]
fn profile_round_trips_with_partial_fields() {
    let path = temp_path();
    std::fs::write(&path, r#"{"user-data": {"name": "Sam", "plan": "premium"}}"#).unwrap();

    let mut store = LocalStore::open(&path).unwrap();
    let profile = store.profile().unwrap();
    assert_eq!(profile.name, "Sam");
    assert_eq!(profile.plan, "premium");
    assert_eq!(profile.usage, Usage::default());

    let updated = UserProfile { email: "sam@example.test".into(), ..profile };
    store.set_profile(&updated).unwrap();
    assert_eq!(LocalStore::open(&path).unwrap().profile(), Some(updated));

    let _ = std::fs::remove_file(path);
}

#[test]
fn unchanged_value_does_not_rewrite_file() {
    let path = temp_path();
    let mut store = LocalStore::open(&path).unwrap();
    store.set_theme(Theme::Dark).unwrap();

    std::fs::remove_file(&path).unwrap();
    store.set_theme(Theme::Dark).unwrap();
    assert!(!path.exists());
}

#[test]
fn corrupt_file_starts_empty() {
    let path = temp_path();
    std::fs::write(&path, "not json").unwrap();
    let store = LocalStore::open(&path).unwrap();
    assert_eq!(store.theme(), Theme::Light);
    let _ = std::fs::remove_file(path);
}

#[test]
fn undecodable_entry_reads_as_absent() {
    let path = temp_path();
    std::fs::write(&path, r#"{"theme-mode": "sepia", "user-data": 12}"#).unwrap();
    let store = LocalStore::open(&path).unwrap();
    assert_eq!(store.theme(), Theme::Light);
    assert!(store.profile().is_none());
    let _ = std::fs::remove_file(path);
}

#[test]
fn remove_deletes_entry() {
    let path = temp_path();
    let mut store = LocalStore::open(&path).unwrap();
    store.set("custom", &42).unwrap();
    assert_eq!(store.get::<i32>("custom"), Some(42));
    store.remove("custom").unwrap();
    assert_eq!(store.get::<i32>("custom"), None);
    let _ = std::fs::remove_file(path);
}

#[test]
fn theme_parses_and_toggles() {
    assert_eq!("Dark".parse::<Theme>(), Ok(Theme::Dark));
    assert_eq!("sepia".parse::<Theme>(), Err(ParseThemeError("sepia".into())));
    assert_eq!(ParseThemeError("sepia".into()).to_string(), "unknown theme: sepia");
    assert_eq!(Theme::Light.toggled(), Theme::Dark);
}
