use base64::Engine;

/// Per-request authentication (section 4.6), mapped to an `Authorization`
/// header.
#[derive(Debug, Clone)]
pub enum Auth {
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
}

impl Auth {
    pub fn header_value(&self) -> Option<String> {
        match self {
            Auth::None => None,
            Auth::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                Some(format!("Basic {encoded}"))
            }
            Auth::Bearer { token } => Some(format!("Bearer {token}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_has_no_header() {
        assert_eq!(Auth::None.header_value(), None);
    }

    #[test]
    fn test_basic_encodes_user_pass() {
        let auth = Auth::Basic {
            username: "user".to_string(),
            password: "pass".to_string(),
        };
        assert_eq!(auth.header_value().unwrap(), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn test_bearer_passes_token_through() {
        let auth = Auth::Bearer {
            token: "tok123".to_string(),
        };
        assert_eq!(auth.header_value().unwrap(), "Bearer tok123");
    }
}
