//! Helper functions for creating test data

use gambit::crypto::Identity;
use gambit::messages::LoginProfile;
use gambit::network::PlayerDetails;

pub fn player_details(first_name: &str) -> PlayerDetails {
    PlayerDetails {
        first_name: first_name.to_string(),
        last_name: "Tester".to_string(),
        rating: 1500,
    }
}

pub fn login_profile(identity: &Identity, first_name: &str) -> LoginProfile {
    LoginProfile {
        first_name: first_name.to_string(),
        last_name: "Tester".to_string(),
        active: true,
        rating: 1500,
        public_key: identity.player_key().encoded(),
    }
}

/// Byte strings that exercise the escaping rules
pub fn awkward_values() -> Vec<Vec<u8>> {
    vec![
        Vec::new(),
        b"\n".to_vec(),
        b"\\".to_vec(),
        b"\\n".to_vec(),
        b"\n\n\\\\n\\".to_vec(),
        b"plain text;with;separators".to_vec(),
        (0u8..=255).collect(),
        vec![b'\n'; 10],
    ]
}
