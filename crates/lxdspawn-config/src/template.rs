//! Container name template expansion
//!
//! Supports:
//! - `{username}`: name of the user the container belongs to
//! - `{{` / `}}`: literal braces

use crate::{ConfigError, Result};

/// Expand a container name template for a user
pub fn expand_name_template(template: &str, username: &str) -> Result<String> {
    let mut result = String::with_capacity(template.len() + username.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                result.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                result.push('}');
            }
            '{' => {
                let mut var_name = String::new();
                let mut closed = false;
                for nc in chars.by_ref() {
                    if nc == '}' {
                        closed = true;
                        break;
                    }
                    var_name.push(nc);
                }
                if !closed {
                    return Err(template_error(template, "unterminated '{'"));
                }
                match var_name.as_str() {
                    "username" => result.push_str(username),
                    other => {
                        return Err(template_error(
                            template,
                            &format!("unknown variable '{}'", other),
                        ))
                    }
                }
            }
            '}' => return Err(template_error(template, "unmatched '}'")),
            _ => result.push(c),
        }
    }

    Ok(result)
}

fn template_error(template: &str, reason: &str) -> ConfigError {
    ConfigError::Template {
        template: template.to_string(),
        reason: reason.to_string(),
    }
}
