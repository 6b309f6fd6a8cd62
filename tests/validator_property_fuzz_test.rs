use page_kit::Page;
use proptest::collection::vec;
use proptest::prelude::*;
use proptest::test_runner::{FileFailurePersistence, TestCaseResult};

const VALIDATOR_PROPTEST_REGRESSION_FILE: &str =
    "tests/proptest-regressions/validator_property_fuzz_test.txt";
const DEFAULT_VALIDATOR_PROPTEST_CASES: u32 = 256;

const VALIDATION_FORM_HTML: &str = r#"
<main>
  <form id="signup-form">
    <input type="email" name="email" required>
    <input type="password" name="password" required>
    <input type="text" name="display-name" required>
  </form>
</main>
"#;

fn env_proptest_cases(var_name: &str, default_cases: u32) -> u32 {
    std::env::var(var_name)
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default_cases)
}

fn validator_proptest_cases() -> u32 {
    std::env::var("PAGE_KIT_VALIDATOR_PROPTEST_CASES")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or_else(|| {
            env_proptest_cases("PAGE_KIT_PROPTEST_CASES", DEFAULT_VALIDATOR_PROPTEST_CASES)
        })
}

fn email_char_strategy() -> BoxedStrategy<char> {
    prop_oneof![
        4 => prop_oneof![Just('a'), Just('b'), Just('z'), Just('0'), Just('9')],
        2 => Just('@'),
        2 => Just('.'),
        1 => Just(' '),
        1 => Just('\t'),
        1 => Just('-'),
        1 => Just('_'),
    ]
    .boxed()
}

fn email_candidate_strategy() -> BoxedStrategy<String> {
    vec(email_char_strategy(), 0..=16)
        .prop_map(|chars| chars.into_iter().collect())
        .boxed()
}

fn password_candidate_strategy() -> BoxedStrategy<String> {
    vec(
        prop_oneof![Just('a'), Just('B'), Just('3'), Just('!'), Just(' '), Just('\u{00E9}')],
        0..=16,
    )
    .prop_map(|chars| chars.into_iter().collect())
    .boxed()
}

fn text_candidate_strategy() -> BoxedStrategy<String> {
    vec(
        prop_oneof![
            3 => Just('a'),
            1 => Just(' '),
            1 => Just('\t'),
            1 => Just('-'),
        ],
        0..=8,
    )
    .prop_map(|chars| chars.into_iter().collect())
    .boxed()
}

// Mirrors the email rule without a regex: no whitespace, exactly one '@'
// with a non-empty local part, and some '.' strictly inside the remainder
// after the '@'.
fn email_should_pass(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let mut parts = value.splitn(2, '@');
    let (Some(local), Some(rest)) = (parts.next(), parts.next()) else {
        return false;
    };
    if local.is_empty() || rest.contains('@') {
        return false;
    }
    rest.char_indices().any(|(index, ch)| {
        ch == '.' && index > 0 && index + ch.len_utf8() < rest.len()
    })
}

fn password_should_pass(value: &str) -> bool {
    value.chars().count() >= 8
}

fn text_should_pass(value: &str) -> bool {
    !value.trim().is_empty()
}

fn assert_validator_matches_rules(
    email: &str,
    password: &str,
    display_name: &str,
) -> TestCaseResult {
    let mut page = Page::from_html(VALIDATION_FORM_HTML)
        .map_err(|err| proptest::test_runner::TestCaseError::fail(format!("{err:?}")))?;

    let typed = page
        .type_text(r#"input[name="email"]"#, email)
        .and_then(|()| page.type_text(r#"input[name="password"]"#, password))
        .and_then(|()| page.type_text(r#"input[name="display-name"]"#, display_name));
    prop_assert!(typed.is_ok(), "typing failed: {typed:?}");

    let expected = email_should_pass(email)
        && password_should_pass(password)
        && text_should_pass(display_name);
    let actual = page.validate_form("signup-form");

    match actual {
        Ok(actual) => prop_assert_eq!(
            actual,
            expected,
            "email={:?} password={:?} display_name={:?}",
            email,
            password,
            display_name
        ),
        Err(error) => prop_assert!(
            false,
            "validate_form failed: {:?} email={:?} password={:?} display_name={:?}",
            error,
            email,
            password,
            display_name
        ),
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: validator_proptest_cases(),
        failure_persistence: Some(Box::new(
            FileFailurePersistence::Direct(VALIDATOR_PROPTEST_REGRESSION_FILE),
        )),
        .. ProptestConfig::default()
    })]

    #[test]
    fn validator_agrees_with_the_field_rules(
        email in email_candidate_strategy(),
        password in password_candidate_strategy(),
        display_name in text_candidate_strategy(),
    ) {
        assert_validator_matches_rules(&email, &password, &display_name)?;
    }
}
