use super::*;

fn bot_message(id: &str, text: &str, streaming: bool) -> Message {
    Message {
        id: id.to_owned(),
        role: Role::Bot,
        text: text.to_owned(),
        bot_type: BotType::General,
        streaming,
        timestamp: 0,
        answer_id: None,
    }
}

#[test]
fn plain_lines_are_text() {
    assert_eq!(parse_input("hello there"), Input::Text("hello there".into()));
}

#[test]
fn slash_commands_parse() {
    assert_eq!(parse_input("/quit"), Input::Quit);
    assert_eq!(parse_input(" /attach ./notes.pdf "), Input::Attach(PathBuf::from("./notes.pdf")));
    assert_eq!(
        parse_input("/analytics Sheet1"),
        Input::Analytics { sheet: "Sheet1".into(), analysis: None }
    );
    assert_eq!(
        parse_input("/clean Sheet1 remove_duplicates,fill_missing_values"),
        Input::Clean {
            sheet: "Sheet1".into(),
            operations: vec!["remove_duplicates".into(), "fill_missing_values".into()],
        }
    );
    assert_eq!(parse_input("/dance"), Input::Unknown("/dance".into()));
}

#[test]
fn streaming_message_is_extended_in_place() {
    let mut renderer = Renderer::default();
    assert_eq!(renderer.render(&bot_message("m1", "echo:", true)), "general> echo:");
    assert_eq!(renderer.render(&bot_message("m1", "echo: hi", true)), " hi");
    assert_eq!(renderer.render(&bot_message("m1", "echo: hi there", false)), " there\n");
}

#[test]
fn new_message_closes_open_line() {
    let mut renderer = Renderer::default();
    renderer.render(&bot_message("m1", "partial", true));
    assert_eq!(renderer.render(&bot_message("m2", "other", false)), "\ngeneral> other\n");
}

#[test]
fn errors_and_user_lines() {
    let mut renderer = Renderer::default();
    let mut user = bot_message("m1", "question", false);
    user.role = Role::User;
    assert_eq!(renderer.render(&user), "");

    let mut error = bot_message("m2", "connection lost", false);
    error.role = Role::Error;
    assert_eq!(renderer.render(&error), "[error] connection lost\n");
}

#[test]
fn profile_edits_only_touch_given_fields() {
    let mut profile = UserProfile { name: "Sam".into(), plan: "premium".into(), ..UserProfile::default() };
    apply_profile_edits(&mut profile, None, Some("sam@example.test".into()), None);
    assert_eq!(profile.name, "Sam");
    assert_eq!(profile.email, "sam@example.test");
    assert_eq!(profile.plan, "premium");
}

#[test]
fn cli_parses_chat_flags() {
    let cli = Cli::try_parse_from(["chatdeck", "--base-url", "http://localhost:5000/", "chat", "--bot", "pdf"]).unwrap();
    let Command::Chat(args) = cli.command else {
        panic!("expected chat");
    };
    assert_eq!(args.bot, BotType::Pdf);
    assert_eq!(cli.base_url.as_deref(), Some("http://localhost:5000/"));
}
