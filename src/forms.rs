use super::*;

// Deliberately permissive: anything@anything.anything, no full address
// grammar.
const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

pub(crate) fn email_value_is_valid(value: &str) -> Result<bool> {
    let regex = fancy_regex::Regex::new(EMAIL_PATTERN)
        .map_err(|err| Error::Runtime(format!("invalid email pattern: {err}")))?;
    regex
        .is_match(value)
        .map_err(|err| Error::Runtime(format!("email pattern match failed: {err}")))
}

pub(crate) fn password_value_is_valid(value: &str) -> bool {
    value.chars().count() >= 8
}

pub(crate) fn presence_value_is_valid(value: &str) -> bool {
    !value.trim().is_empty()
}

pub(crate) fn field_value_is_valid(field_type: &str, value: &str) -> Result<bool> {
    match field_type {
        "email" => email_value_is_valid(value),
        "password" => Ok(password_value_is_valid(value)),
        _ => Ok(presence_value_is_valid(value)),
    }
}

impl Page {
    /// Validates every required field of the form with the given id. An
    /// unknown id is a lenient `Ok(true)`, not an error. The result is the
    /// AND across all required fields; there is no per-field reporting and
    /// nothing in the tree is mutated.
    pub fn validate_form(&self, form_id: &str) -> Result<bool> {
        let Some(form) = self.dom.by_id(form_id) else {
            return Ok(true);
        };

        let fields = self.dom.query_selector_all_from(
            form,
            "input[required], textarea[required], select[required]",
        )?;

        let mut all_valid = true;
        for field in fields {
            let tag = self
                .dom
                .tag_name(field)
                .map(str::to_ascii_lowercase)
                .unwrap_or_default();
            let field_type = if tag == "input" {
                self.dom
                    .attr(field, "type")
                    .map(|t| t.to_ascii_lowercase())
                    .unwrap_or_else(|| "text".to_string())
            } else {
                // Textareas and selects take the plain presence rule.
                "text".to_string()
            };
            let value = self.dom.value(field)?;
            all_valid = field_value_is_valid(&field_type, &value)? && all_valid;
        }
        Ok(all_valid)
    }
}
