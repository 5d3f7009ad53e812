//! Unit tests for user list parsing.

use super::*;
use rstest::rstest;

#[rstest]
fn parses_entries_in_order() {
    let users = parse_users("alice:pw1,bob:pw2:ro").expect("valid list");
    assert_eq!(
        users,
        vec![
            UserSpec::new("alice", "pw1", false),
            UserSpec::new("bob", "pw2", true),
        ]
    );
}

#[rstest]
#[case("alice:pw1:ro", true)]
#[case("alice:pw1", false)]
#[case("alice:pw1:rw", false)]
#[case("alice:pw1:RO", false)]
#[case("alice:pw1:", false)]
fn read_only_only_for_exact_flag(#[case] raw: &str, #[case] expected: bool) {
    let users = parse_users(raw).expect("valid list");
    assert_eq!(users.first().map(|user| user.read_only), Some(expected));
}

#[rstest]
#[case("alice", 1)]
#[case("alice:pw:ro:extra", 1)]
#[case("alice:pw,bob", 2)]
#[case("alice:pw,", 2)]
#[case(":pw", 1)]
#[case("alice:", 1)]
fn rejects_malformed_entries(#[case] raw: &str, #[case] position: usize) {
    let err = parse_users(raw).expect_err("malformed list");
    assert_eq!(err, UserSpecError::InvalidFormat { position });
}

#[rstest]
#[case("..:pw", "..", 1)]
#[case(".:pw", ".", 1)]
#[case("alice:pw,a/b:pw", "a/b", 2)]
#[case("-rf:pw", "-rf", 1)]
#[case(".hidden:pw:ro", ".hidden", 1)]
#[case("bob@host:pw", "bob@host", 1)]
fn rejects_usernames_unsafe_as_paths(
    #[case] raw: &str,
    #[case] username: &str,
    #[case] position: usize,
) {
    let err = parse_users(raw).expect_err("unsafe username");
    assert_eq!(
        err,
        UserSpecError::InvalidUsername {
            username: username.to_owned(),
            position,
        }
    );
}

#[rstest]
#[case("alice")]
#[case("svc_backup-2")]
#[case("first.last")]
#[case("x..y")]
fn accepts_safe_usernames(#[case] username: &str) {
    assert!(is_safe_username(username));
}

#[rstest]
#[case("alice:pw1,alice:pw2")]
#[case("alice:pw1,alice:pw1:ro")]
#[case("bob:x,alice:pw1:rw,alice:other")]
fn rejects_duplicate_usernames(#[case] raw: &str) {
    let err = parse_users(raw).expect_err("duplicate list");
    assert_eq!(
        err,
        UserSpecError::DuplicateUser {
            username: String::from("alice")
        }
    );
}

#[rstest]
fn rejects_empty_list() {
    assert_eq!(parse_users("  "), Err(UserSpecError::Empty));
    assert_eq!(validate_charset(""), Err(UserSpecError::Empty));
}

#[rstest]
#[case("admin:p@ss.w/rd_-1,user:pass2:ro")]
#[case("a:b")]
fn charset_accepts_documented_characters(#[case] raw: &str) {
    assert!(validate_charset(raw).is_ok());
}

#[rstest]
#[case("alice:pw 1", ' ')]
#[case("alice:pw;rm", ';')]
#[case("alice:\"pw\"", '"')]
#[case("alice:pw$", '$')]
fn charset_rejects_shell_metacharacters(#[case] raw: &str, #[case] character: char) {
    assert_eq!(
        validate_charset(raw),
        Err(UserSpecError::InvalidCharacters { character })
    );
}

#[rstest]
fn debug_output_redacts_password() {
    let rendered = format!("{:?}", UserSpec::new("alice", "hunter2", false));
    assert!(!rendered.contains("hunter2"), "password leaked: {rendered}");
    assert!(rendered.contains("alice"));
}

#[rstest]
fn access_label_reflects_mode() {
    assert_eq!(UserSpec::new("a", "b", true).access_label(), "ro");
    assert_eq!(UserSpec::new("a", "b", false).access_label(), "rw");
}
