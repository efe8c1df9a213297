//! Login name formats. A format is a template such as `%U@example.com` or
//! `EXAMPLE\%U`, where `%U` stands for the bare user name.

const USER_TOKEN: &str = "%U";

/// Extract the user name from `login` if it matches `format`.
pub fn parse_login(format: &str, login: &str) -> Option<String> {
    let (prefix, suffix) = format.split_once(USER_TOKEN)?;
    let login = login.trim();
    if login.len() < prefix.len() + suffix.len() {
        return None;
    }
    let split = login.len() - suffix.len();
    let head = login.get(..prefix.len())?;
    let user = login.get(prefix.len()..split)?;
    let tail = login.get(split..)?;
    if head.eq_ignore_ascii_case(prefix) && tail.eq_ignore_ascii_case(suffix) && !user.is_empty()
    {
        Some(user.to_string())
    } else {
        None
    }
}

/// Parse a login against the first matching format. A name without any realm
/// decoration is accepted as is when one of the formats is the bare `%U`.
pub fn parse_login_any(formats: &[String], login: &str) -> Option<String> {
    formats.iter().find_map(|f| parse_login(f, login))
}

/// Parse every login, or report the first one that matches no format.
pub fn parse_all(formats: &[String], logins: &[String]) -> Result<Vec<String>, String> {
    logins
        .iter()
        .map(|login| parse_login_any(formats, login).ok_or_else(|| login.clone()))
        .collect()
}

pub fn format_login(format: &str, user: &str) -> String {
    format.replacen(USER_TOKEN, user, 1)
}

/// Convert a `/home/%U@%D` style template into the lowercase tokens sssd expects.
pub fn sssd_home_template(template: &str) -> String {
    template.replace("%U", "%u").replace("%D", "%d")
}
