use super::*;

use serde_json::json;

const PAGE_SHELL: &str = r##"
<nav class="nav-menu"><a href="#features">Features</a></nav>
<main id="content">
  <div class="alert alert-info" id="first-alert">Welcome back</div>
  <section id="features"><h2>Features</h2></section>
</main>
"##;

#[test]
fn bootstrap_schedules_one_dismissal_per_alert() -> Result<()> {
    let html = r#"
    <main>
      <div class="alert alert-success">Saved</div>
      <div class="alert alert-error">Failed</div>
      <div class="banner">Not an alert</div>
    </main>
    "#;

    let page = Page::from_html(html)?;
    let timers = page.pending_timers();
    assert_eq!(timers.len(), 2);
    assert!(timers.iter().all(|timer| timer.due_at == ALERT_DISMISS_DELAY_MS));
    Ok(())
}

#[test]
fn bootstrap_without_alerts_is_a_no_op() -> Result<()> {
    let page = Page::from_html("<main><p>Nothing to dismiss</p></main>")?;
    assert!(page.pending_timers().is_empty());
    Ok(())
}

#[test]
fn alert_fades_then_leaves_the_tree() -> Result<()> {
    let mut page = Page::from_html(PAGE_SHELL)?;
    assert!(page.exists("#first-alert")?);

    page.advance_time(ALERT_DISMISS_DELAY_MS)?;
    assert_eq!(page.style("#first-alert", "opacity")?, "0");
    assert!(page.exists("#first-alert")?);

    page.advance_time(ALERT_FADE_MS)?;
    assert!(!page.exists("#first-alert")?);
    Ok(())
}

#[test]
fn alert_removed_before_its_timer_makes_the_timer_inert() -> Result<()> {
    let mut page = Page::from_html(PAGE_SHELL)?;
    page.set_html("main", "<p>cleared</p>")?;
    assert!(!page.exists("#first-alert")?);

    // The stale fade still runs; the removal finds no parent and no-ops.
    page.flush()?;
    assert!(!page.exists("#first-alert")?);
    assert!(page.pending_timers().is_empty());
    Ok(())
}

#[test]
fn flush_advances_the_clock_through_chained_timers() -> Result<()> {
    let mut page = Page::from_html(PAGE_SHELL)?;
    page.flush()?;
    assert_eq!(page.now_ms(), ALERT_DISMISS_DELAY_MS + ALERT_FADE_MS);
    assert!(!page.exists(".alert")?);
    Ok(())
}

#[test]
fn advance_time_rejects_negative_deltas() -> Result<()> {
    let mut page = Page::from_html("<main></main>")?;
    assert!(matches!(page.advance_time(-1), Err(Error::Runtime(_))));
    Ok(())
}

#[test]
fn advance_time_to_rejects_past_targets() -> Result<()> {
    let mut page = Page::from_html("<main></main>")?;
    page.advance_time(100)?;
    assert!(matches!(page.advance_time_to(50), Err(Error::Runtime(_))));
    page.advance_time_to(100)?;
    Ok(())
}

#[test]
fn clear_all_timers_reports_the_dropped_count() -> Result<()> {
    let mut page = Page::from_html(PAGE_SHELL)?;
    assert_eq!(page.clear_all_timers(), 1);
    page.flush()?;
    assert!(page.exists("#first-alert")?);
    Ok(())
}

#[test]
fn anchor_click_records_a_smooth_scroll() -> Result<()> {
    let mut page = Page::from_html(PAGE_SHELL)?;
    page.click(r##"a[href="#features"]"##)?;

    let events = page.take_scroll_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].behavior, ScrollBehavior::Smooth);
    assert_eq!(events[0].target, Some(page.node_id("#features")?));
    Ok(())
}

#[test]
fn placeholder_anchor_keeps_its_default_jump() -> Result<()> {
    let html = r##"<main><a id="stub" href="#">top</a></main>"##;
    let mut page = Page::from_html(html)?;
    page.click("#stub")?;

    let events = page.take_scroll_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].behavior, ScrollBehavior::Auto);
    assert_eq!(events[0].target, None);
    Ok(())
}

#[test]
fn anchor_to_missing_fragment_does_nothing() -> Result<()> {
    let html = r##"<main><a id="gone" href="#nowhere">?</a></main>"##;
    let mut page = Page::from_html(html)?;
    page.click("#gone")?;
    assert!(page.take_scroll_events().is_empty());
    Ok(())
}

#[test]
fn anchors_inserted_after_load_are_not_bound() -> Result<()> {
    let html = r#"
    <main>
      <div id="container"></div>
      <section id="target"></section>
    </main>
    "#;
    let mut page = Page::from_html(html)?;
    page.set_html("#container", r##"<a id="late" href="#target">later</a>"##)?;
    page.click("#late")?;

    // The unbound anchor falls back to the browser's plain jump.
    let events = page.take_scroll_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].behavior, ScrollBehavior::Auto);
    assert_eq!(events[0].target, Some(page.node_id("#target")?));
    Ok(())
}

#[test]
fn mobile_menu_toggle_flips_and_restores_active() -> Result<()> {
    let mut page = Page::from_html(PAGE_SHELL)?;
    assert!(!page.has_class(".nav-menu", "active")?);

    page.toggle_mobile_menu()?;
    assert!(page.has_class(".nav-menu", "active")?);

    page.toggle_mobile_menu()?;
    assert!(!page.has_class(".nav-menu", "active")?);
    Ok(())
}

#[test]
fn mobile_menu_toggle_without_menu_is_silent() -> Result<()> {
    let mut page = Page::from_html("<main></main>")?;
    page.toggle_mobile_menu()?;
    Ok(())
}

#[test]
fn validate_form_unknown_id_is_lenient() -> Result<()> {
    let page = Page::from_html("<main></main>")?;
    assert!(page.validate_form("missing")?);
    Ok(())
}

#[test]
fn validate_form_with_no_required_fields_passes() -> Result<()> {
    let html = r#"
    <form id="search">
      <input type="text" name="q" value="">
    </form>
    "#;
    let page = Page::from_html(html)?;
    assert!(page.validate_form("search")?);
    Ok(())
}

#[test]
fn validate_form_checks_email_shape() -> Result<()> {
    let html = r#"
    <form id="login">
      <input type="email" name="email" required>
    </form>
    "#;
    let mut page = Page::from_html(html)?;

    for bad in ["", "plainaddress", "a@b", "a@b.", "a @b.c", "a@ b.c"] {
        page.type_text(r#"input[name="email"]"#, bad)?;
        assert!(!page.validate_form("login")?, "accepted {bad:?}");
    }

    page.type_text(r#"input[name="email"]"#, "a@b.c")?;
    assert!(page.validate_form("login")?);
    Ok(())
}

#[test]
fn validate_form_checks_password_length_boundary() -> Result<()> {
    let html = r#"
    <form id="signup">
      <input type="password" name="password" required>
    </form>
    "#;
    let mut page = Page::from_html(html)?;

    page.type_text(r#"input[name="password"]"#, "1234567")?;
    assert!(!page.validate_form("signup")?);

    page.type_text(r#"input[name="password"]"#, "12345678")?;
    assert!(page.validate_form("signup")?);
    Ok(())
}

#[test]
fn validate_form_rejects_whitespace_only_text() -> Result<()> {
    let html = r#"
    <form id="profile">
      <input type="text" name="name" required>
      <textarea name="bio" required>   </textarea>
    </form>
    "#;
    let mut page = Page::from_html(html)?;

    page.type_text(r#"input[name="name"]"#, "   ")?;
    assert!(!page.validate_form("profile")?);

    page.type_text(r#"input[name="name"]"#, "Ada")?;
    assert!(!page.validate_form("profile")?);

    page.type_text(r#"textarea[name="bio"]"#, "writes compilers")?;
    assert!(page.validate_form("profile")?);
    Ok(())
}

#[test]
fn validate_form_reads_select_values() -> Result<()> {
    let html = r#"
    <form id="pick">
      <select name="city" required>
        <option value="">Choose one</option>
        <option value="osaka">Osaka</option>
      </select>
    </form>
    "#;
    let page = Page::from_html(html)?;
    assert!(!page.validate_form("pick")?);

    let html = r#"
    <form id="pick">
      <select name="city" required>
        <option value="">Choose one</option>
        <option value="osaka" selected>Osaka</option>
      </select>
    </form>
    "#;
    let page = Page::from_html(html)?;
    assert!(page.validate_form("pick")?);
    Ok(())
}

#[test]
fn validate_form_aggregates_across_fields() -> Result<()> {
    let html = r#"
    <form id="signup">
      <input type="email" name="email" required value="a@b.c">
      <input type="password" name="password" required value="short">
    </form>
    "#;
    let page = Page::from_html(html)?;
    assert!(!page.validate_form("signup")?);
    Ok(())
}

#[test]
fn api_call_success_carries_status_and_parsed_body() -> Result<()> {
    let mut page = Page::from_html("<main></main>")?;
    page.set_fetch_mock("/api/items", 200, r#"{"x":1}"#);

    let result = page.api_call("/api/items", None);
    assert!(result.ok);
    assert_eq!(result.status, Some(200));
    assert_eq!(result.data, Some(json!({"x": 1})));
    assert_eq!(result.error, None);
    assert_eq!(page.take_fetch_calls(), vec!["/api/items".to_string()]);
    Ok(())
}

#[test]
fn api_call_reports_http_failures_with_parsed_body() -> Result<()> {
    let mut page = Page::from_html("<main></main>")?;
    page.set_fetch_mock("/api/items", 404, r#"{"detail":"not found"}"#);

    let result = page.api_call("/api/items", None);
    assert!(!result.ok);
    assert_eq!(result.status, Some(404));
    assert_eq!(result.data, Some(json!({"detail": "not found"})));
    assert_eq!(result.error, None);
    Ok(())
}

#[test]
fn api_call_converts_network_failure_into_a_value() -> Result<()> {
    let mut page = Page::from_html("<main></main>")?;
    page.set_fetch_error("/api/items", "connection refused");

    let result = page.api_call("/api/items", None);
    assert!(!result.ok);
    assert_eq!(result.status, None);
    assert_eq!(result.data, None);
    assert!(result.error.as_deref().unwrap_or("").contains("connection refused"));
    Ok(())
}

#[test]
fn api_call_without_a_registered_mock_is_a_network_failure() -> Result<()> {
    let mut page = Page::from_html("<main></main>")?;
    let result = page.api_call("/api/unknown", None);
    assert!(!result.ok);
    assert!(!result.error.unwrap_or_default().is_empty());
    Ok(())
}

#[test]
fn api_call_treats_invalid_json_as_failure() -> Result<()> {
    let mut page = Page::from_html("<main></main>")?;
    page.set_fetch_mock("/api/items", 200, "not json");

    let result = page.api_call("/api/items", None);
    assert!(!result.ok);
    assert_eq!(result.data, None);
    assert!(result.error.unwrap_or_default().contains("invalid JSON"));
    Ok(())
}

#[test]
fn api_call_failure_leaves_a_diagnostic_line() -> Result<()> {
    let mut page = Page::from_html("<main></main>")?;
    page.set_fetch_error("/api/items", "boom");

    let _ = page.api_call("/api/items", None);
    let logs = page.take_trace_logs();
    assert!(logs.iter().any(|line| line.contains("/api/items") && line.contains("boom")));
    Ok(())
}

#[derive(Clone, Default)]
struct CapturingTransport {
    captured: std::rc::Rc<std::cell::RefCell<Vec<ApiOptions>>>,
}

impl FetchTransport for CapturingTransport {
    fn fetch(
        &mut self,
        _url: &str,
        options: &ApiOptions,
    ) -> std::result::Result<FetchResponse, String> {
        self.captured.borrow_mut().push(options.clone());
        Ok(FetchResponse::new(200, "{}"))
    }
}

#[test]
fn api_call_defaults_set_json_content_type() -> Result<()> {
    let mut page = Page::from_html("<main></main>")?;
    let transport = CapturingTransport::default();
    let captured = transport.captured.clone();
    page.set_fetch_transport(Box::new(transport));

    let result = page.api_call("/api/items", None);
    assert!(result.ok);

    let seen = captured.borrow();
    let headers = seen[0].headers.clone().unwrap_or_default();
    assert_eq!(
        headers.get("content-type").map(String::as_str),
        Some("application/json")
    );
    Ok(())
}

#[test]
fn api_call_shallow_merge_replaces_headers_wholesale() -> Result<()> {
    let mut page = Page::from_html("<main></main>")?;
    let transport = CapturingTransport::default();
    let captured = transport.captured.clone();
    page.set_fetch_transport(Box::new(transport));

    let mut headers = std::collections::BTreeMap::new();
    headers.insert("x-token".to_string(), "secret".to_string());
    let options = ApiOptions {
        method: Some("POST".to_string()),
        headers: Some(headers.clone()),
        body: Some(r#"{"name":"a"}"#.to_string()),
    };
    let _ = page.api_call("/api/items", Some(options));

    // Caller headers replace the default map, so the JSON content-type is
    // gone rather than merged in.
    let seen = captured.borrow();
    assert_eq!(seen[0].headers, Some(headers));
    assert_eq!(seen[0].method.as_deref(), Some("POST"));
    Ok(())
}

#[test]
fn show_notification_prepends_a_dismissible_banner() -> Result<()> {
    let html = r#"<main><p id="existing">Old content</p></main>"#;
    let mut page = Page::from_html(html)?;
    page.show_notification("Saved", Some("success"))?;

    assert_eq!(page.count(".alert.alert-success")?, 1);
    assert!(page.text(".alert-success")?.starts_with("Saved"));
    // First child of main, ahead of the server-rendered content.
    let dump = page.dump_dom("main")?;
    let alert_at = dump.find("alert-success").unwrap_or(usize::MAX);
    let existing_at = dump.find("existing").unwrap_or(0);
    assert!(alert_at < existing_at);
    Ok(())
}

#[test]
fn show_notification_defaults_to_success() -> Result<()> {
    let mut page = Page::from_html("<main></main>")?;
    page.show_notification("Done", None)?;
    assert_eq!(page.count(".alert.alert-success")?, 1);
    Ok(())
}

#[test]
fn show_notification_close_button_removes_the_banner() -> Result<()> {
    let mut page = Page::from_html("<main></main>")?;
    page.show_notification("Saved", Some("success"))?;
    assert!(page.exists(".alert-success")?);

    page.click(".alert-close")?;
    assert!(!page.exists(".alert-success")?);

    // The scheduled fade and removal find nothing left to do.
    page.flush()?;
    assert!(!page.exists(".alert-success")?);
    Ok(())
}

#[test]
fn show_notification_without_main_stays_detached() -> Result<()> {
    let mut page = Page::from_html("<div id=\"content\"></div>")?;
    page.show_notification("Saved", Some("error"))?;

    assert!(!page.exists(".alert-error")?);
    // The dismissal sequence is scheduled regardless and must stay inert.
    assert_eq!(page.pending_timers().len(), 1);
    page.flush()?;
    assert!(!page.exists(".alert-error")?);
    Ok(())
}

#[test]
fn show_notification_banner_auto_dismisses() -> Result<()> {
    let mut page = Page::from_html("<main></main>")?;
    page.show_notification("Saved", Some("success"))?;

    page.advance_time(ALERT_DISMISS_DELAY_MS)?;
    assert_eq!(page.style(".alert-success", "opacity")?, "0");
    page.advance_time(ALERT_FADE_MS)?;
    assert!(!page.exists(".alert-success")?);
    Ok(())
}

#[test]
fn field_rules_cover_their_boundaries() -> Result<()> {
    assert!(forms::email_value_is_valid("a@b.c")?);
    assert!(forms::email_value_is_valid("first.last@example.co.jp")?);
    assert!(!forms::email_value_is_valid("a@b")?);
    assert!(!forms::email_value_is_valid("@b.c")?);
    assert!(!forms::email_value_is_valid("a@.")?);

    assert!(forms::password_value_is_valid("12345678"));
    assert!(!forms::password_value_is_valid("1234567"));

    assert!(forms::presence_value_is_valid(" x "));
    assert!(!forms::presence_value_is_valid("   "));
    Ok(())
}

#[test]
fn selector_rejects_unsupported_syntax() -> Result<()> {
    let page = Page::from_html("<main></main>")?;
    assert!(matches!(
        page.exists("div:hover"),
        Err(Error::UnsupportedSelector(_))
    ));
    assert!(matches!(
        page.exists("div["),
        Err(Error::UnsupportedSelector(_))
    ));
    assert!(matches!(page.exists(""), Err(Error::UnsupportedSelector(_))));
    Ok(())
}

#[test]
fn selector_matches_compound_steps_and_combinators() -> Result<()> {
    let html = r#"
    <div id="outer" class="wrap">
      <p class="note big">one</p>
      <section><p class="note">two</p></section>
    </div>
    "#;
    let page = Page::from_html(html)?;

    assert_eq!(page.count("p.note")?, 2);
    assert_eq!(page.count("p.note.big")?, 1);
    assert_eq!(page.count("#outer > p")?, 1);
    assert_eq!(page.count("#outer p")?, 2);
    assert_eq!(page.count("div.wrap section p")?, 1);
    assert_eq!(page.count("p.note, section")?, 3);
    Ok(())
}

#[test]
fn selector_attribute_conditions_match_prefix_and_equality() -> Result<()> {
    let html = r##"
    <a id="frag" href="#here">in-page</a>
    <a id="ext" href="https://example.org/#here">external</a>
    <input name="email" type="email">
    "##;
    let page = Page::from_html(html)?;

    assert_eq!(page.count(r##"a[href^="#"]"##)?, 1);
    assert_eq!(page.count(r#"a[href]"#)?, 2);
    assert_eq!(page.count(r#"input[type="email"]"#)?, 1);
    assert_eq!(page.count(r#"input[type=email]"#)?, 1);
    Ok(())
}

#[test]
fn html_loader_seeds_form_control_values() -> Result<()> {
    let html = r#"
    <form id="f">
      <textarea name="bio">hello</textarea>
      <input name="q" value="preset">
      <select name="city">
        <option value="tokyo">Tokyo</option>
        <option value="osaka" selected>Osaka</option>
      </select>
    </form>
    "#;
    let mut page = Page::from_html(html)?;

    page.type_text(r#"input[name="q"]"#, "changed")?;
    assert_eq!(page.attr(r#"input[name="q"]"#, "value")?.as_deref(), Some("preset"));
    assert_eq!(page.text(r#"textarea[name="bio"]"#)?, "hello");
    Ok(())
}

#[test]
fn html_loader_decodes_character_references() -> Result<()> {
    let html = "<p id=\"msg\">fish &amp; chips &times; 2</p>";
    let page = Page::from_html(html)?;
    page.assert_text("#msg", "fish & chips \u{00D7} 2")?;
    Ok(())
}

#[test]
fn html_loader_closes_implied_list_items() -> Result<()> {
    let html = "<ul><li>one<li>two<li>three</ul><p id=\"after\">after</p>";
    let page = Page::from_html(html)?;
    assert_eq!(page.count("ul > li")?, 3);
    page.assert_text("#after", "after")?;
    Ok(())
}

#[test]
fn html_loader_treats_void_tags_as_leaves() -> Result<()> {
    let html = r#"<p id="wrap">before<br>after<img src="x.png"></p>"#;
    let page = Page::from_html(html)?;
    page.assert_text("#wrap", "beforeafter")?;
    assert_eq!(page.count("p > br")?, 1);
    assert_eq!(page.count("p > img")?, 1);
    Ok(())
}

#[test]
fn html_loader_skips_comments_and_script_bodies() -> Result<()> {
    let html = r#"
    <!-- server banner -->
    <main><p id="msg">shown</p></main>
    <script>const ignored = "<p>not markup</p>";</script>
    "#;
    let page = Page::from_html(html)?;
    assert_eq!(page.count("p")?, 1);
    page.assert_text("#msg", "shown")?;
    Ok(())
}

#[test]
fn html_loader_reports_unclosed_structures() {
    assert!(matches!(
        Page::from_html("<!-- never closed"),
        Err(Error::HtmlParse(_))
    ));
    assert!(matches!(
        Page::from_html("<div class='open"),
        Err(Error::HtmlParse(_))
    ));
    assert!(matches!(
        Page::from_html("<script>let x = 1;"),
        Err(Error::HtmlParse(_))
    ));
}

#[test]
fn type_text_rejects_non_form_targets() -> Result<()> {
    let mut page = Page::from_html("<main><p id=\"msg\">x</p></main>")?;
    assert!(matches!(
        page.type_text("#msg", "value"),
        Err(Error::TypeMismatch { .. })
    ));
    Ok(())
}

#[test]
fn type_text_ignores_disabled_and_readonly_fields() -> Result<()> {
    let html = r#"
    <form id="f">
      <input name="a" disabled value="keep">
      <input name="b" readonly value="keep">
    </form>
    "#;
    let mut page = Page::from_html(html)?;
    page.type_text(r#"input[name="a"]"#, "changed")?;
    page.type_text(r#"input[name="b"]"#, "changed")?;
    assert!(page.validate_form("f")?);
    Ok(())
}

#[test]
fn trace_log_honors_its_limit() -> Result<()> {
    let mut page = Page::from_html("<main></main>")?;
    page.enable_trace(true);
    page.set_trace_stderr(false);
    page.set_trace_log_limit(3)?;

    for _ in 0..5 {
        page.toggle_mobile_menu()?;
        page.show_notification("ping", None)?;
    }
    assert!(page.take_trace_logs().len() <= 3);
    assert!(matches!(
        page.set_trace_log_limit(0),
        Err(Error::Runtime(_))
    ));
    Ok(())
}

#[test]
fn missing_selector_is_reported_with_the_selector_text() -> Result<()> {
    let mut page = Page::from_html("<main></main>")?;
    match page.click("#absent") {
        Err(Error::SelectorNotFound(selector)) => assert_eq!(selector, "#absent"),
        other => panic!("unexpected result: {other:?}"),
    }
    Ok(())
}
