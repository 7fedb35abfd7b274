use super::*;

#[test]
fn new_message_is_finalized_with_timestamp() {
    let msg = Message::new(1, Role::User, "hi", BotType::Qa);
    assert_eq!(msg.role, Role::User);
    assert_eq!(msg.text, "hi");
    assert!(!msg.streaming);
    assert!(msg.timestamp > 0);
    assert!(msg.answer_id.is_none());
}

#[test]
fn message_ids_do_not_collide_within_a_session() {
    let ids: std::collections::HashSet<String> = (0..500).map(message_id).collect();
    assert_eq!(ids.len(), 500);
    assert!(message_id(7).starts_with("m000007-"));
}

#[test]
fn only_streaming_bot_messages_report_streaming() {
    let mut msg = Message::new(1, Role::Bot, "", BotType::General);
    assert!(!msg.is_streaming_bot());
    msg.streaming = true;
    assert!(msg.is_streaming_bot());
    msg.role = Role::User;
    assert!(!msg.is_streaming_bot());
}

#[test]
fn attachment_name_uses_file_name_of_path() {
    let attachment = Attachment::Path(PathBuf::from("/data/reports/q3.xlsx"));
    assert_eq!(attachment.name(), "q3.xlsx");
}

#[tokio::test]
async fn bytes_attachment_reads_without_io() {
    let attachment = Attachment::Bytes { name: "a.txt".into(), data: b"abc".to_vec() };
    let file = attachment.read().await.expect("read");
    assert_eq!(file.name, "a.txt");
    assert_eq!(file.data, b"abc");
}

#[tokio::test]
async fn path_attachment_reads_file_bytes() {
    let path = std::env::temp_dir().join(format!("chatdeck-{}.bin", uuid::Uuid::new_v4()));
    tokio::fs::write(&path, [1_u8, 2, 3]).await.expect("write");

    let file = Attachment::Path(path.clone()).read().await.expect("read");
    assert_eq!(file.data, vec![1, 2, 3]);

    let _ = tokio::fs::remove_file(&path).await;
}

#[tokio::test]
async fn missing_path_reports_file_read_error() {
    let attachment = Attachment::Path(PathBuf::from("/definitely/not/here.pdf"));
    let err = attachment.read().await.expect_err("missing file");
    assert!(matches!(err, ClientError::FileRead { ref name, .. } if name == "here.pdf"));
}
