//! Environment-variable materialization (spec §4.3.10): layers platform
//! defaults, user plaintext, decrypted user secrets, decrypted channel
//! tokens, and reserved system vars into a split plaintext/sensitive result,
//! then encrypts the sensitive half under the app's `env_key`.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use kiloclaw_core::constants::{RESERVED_ENV_PREFIXES};
use kiloclaw_core::models::{ChannelKind, SecretEnvelope};
use kiloclaw_core::{Error, Result};
use kiloclaw_crypto::SecretEnvelopeDecryptor;

fn env_var_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap())
}

/// The single authoritative validator for user-supplied env var names (spec
/// §9 Open Question 2: the source carried two competing validators, a schema
/// regex and `validateUserEnvVarName`; this is the one used everywhere).
pub fn validate_user_env_var_name(name: &str) -> Result<()> {
    if !env_var_name_regex().is_match(name) {
        return Err(Error::InvalidArgument(format!(
            "env var name {name:?} must match ^[A-Za-z_][A-Za-z0-9_]*$"
        )));
    }
    if RESERVED_ENV_PREFIXES.iter().any(|p| name.starts_with(p)) {
        return Err(Error::InvalidArgument(format!(
            "env var name {name:?} uses a reserved prefix"
        )));
    }
    Ok(())
}

pub struct MaterializeInput<'a> {
    pub platform_defaults: &'a HashMap<String, String>,
    pub sandbox_id: &'a str,
    pub gateway_hmac_secret: &'a [u8],
    pub env_vars: Option<&'a HashMap<String, String>>,
    pub encrypted_secrets: Option<&'a HashMap<String, SecretEnvelope>>,
    pub channels: Option<&'a HashMap<ChannelKind, SecretEnvelope>>,
}

/// Plaintext and to-be-encrypted-sensitive env values, before the sensitive
/// half is AES-256-GCM sealed under the app's `env_key`.
pub struct MaterializedEnv {
    pub plaintext: HashMap<String, String>,
    pub sensitive: HashMap<String, String>,
}

pub fn materialize(
    input: MaterializeInput<'_>,
    decryptor: &dyn SecretEnvelopeDecryptor,
) -> Result<MaterializedEnv> {
    let mut plaintext = input.platform_defaults.clone();
    let mut sensitive = HashMap::new();

    if let Some(env_vars) = input.env_vars {
        for (name, value) in env_vars {
            validate_user_env_var_name(name)?;
            plaintext.insert(name.clone(), value.clone());
        }
    }

    if let Some(secrets) = input.encrypted_secrets {
        for (name, envelope) in secrets {
            let value = decryptor
                .decrypt(envelope)
                .map_err(|e| Error::InvalidArgument(format!("failed to decrypt secret {name:?}: {e}")))?;
            sensitive.insert(name.clone(), value);
        }
    }

    if let Some(channels) = input.channels {
        for (kind, envelope) in channels {
            let value = decryptor.decrypt(envelope).map_err(|e| {
                Error::InvalidArgument(format!("failed to decrypt channel {kind:?} token: {e}"))
            })?;
            sensitive.insert(kind.env_var_name().to_string(), value);
        }
    }

    // Reserved system vars, inserted last so no user input can override them.
    sensitive.insert(
        "OPENCLAW_GATEWAY_TOKEN".to_string(),
        kiloclaw_crypto::gateway_token(input.gateway_hmac_secret, input.sandbox_id),
    );
    plaintext.insert("AUTO_APPROVE_DEVICES".to_string(), "true".to_string());

    Ok(MaterializedEnv { plaintext, sensitive })
}

/// Encrypt the sensitive half under `env_key` and merge with the plaintext
/// half into the final map handed to the machine's `env` field, with
/// sensitive names rewritten to `KILOCLAW_ENC_<OriginalName>`.
pub fn seal_and_merge(materialized: MaterializedEnv, env_key_b64: &str) -> Result<HashMap<String, String>> {
    let mut env = materialized.plaintext;
    for (name, value) in materialized.sensitive {
        let wire = kiloclaw_crypto::encrypt_sensitive(env_key_b64, &value)
            .map_err(|e| Error::Internal(format!("failed to encrypt {name:?}: {e}")))?;
        env.insert(format!("KILOCLAW_ENC_{name}"), wire);
    }
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiloclaw_crypto::CryptoError;

    struct PassthroughDecryptor;
    impl SecretEnvelopeDecryptor for PassthroughDecryptor {
        fn decrypt(&self, envelope: &SecretEnvelope) -> std::result::Result<String, CryptoError> {
            Ok(envelope.ciphertext.clone())
        }
    }

    fn envelope(value: &str) -> SecretEnvelope {
        SecretEnvelope {
            encrypted_key: String::new(),
            iv: String::new(),
            ciphertext: value.to_string(),
        }
    }

    #[test]
    fn reserved_prefixes_are_rejected() {
        assert!(validate_user_env_var_name("KILOCLAW_ENC_HACK").is_err());
        assert!(validate_user_env_var_name("KILOCLAW_ENV_HACK").is_err());
        assert!(validate_user_env_var_name("NORMAL_VAR").is_ok());
    }

    #[test]
    fn invalid_identifier_shape_is_rejected() {
        assert!(validate_user_env_var_name("1LEADING_DIGIT").is_err());
        assert!(validate_user_env_var_name("has space").is_err());
    }

    #[test]
    fn system_vars_cannot_be_overridden_by_user_input() {
        let mut env_vars = HashMap::new();
        env_vars.insert("AUTO_APPROVE_DEVICES".to_string(), "false".to_string());

        let defaults = HashMap::new();
        let input = MaterializeInput {
            platform_defaults: &defaults,
            sandbox_id: "sandbox-1",
            gateway_hmac_secret: b"secret",
            env_vars: Some(&env_vars),
            encrypted_secrets: None,
            channels: None,
        };
        let result = materialize(input, &PassthroughDecryptor).unwrap();
        assert_eq!(result.plaintext.get("AUTO_APPROVE_DEVICES").unwrap(), "true");
    }

    #[test]
    fn secrets_and_channels_end_up_sensitive_and_get_sealed() {
        let mut secrets = HashMap::new();
        secrets.insert("API_KEY".to_string(), envelope("super-secret"));
        let mut channels = HashMap::new();
        channels.insert(ChannelKind::Telegram, envelope("tg-token"));

        let defaults = HashMap::new();
        let input = MaterializeInput {
            platform_defaults: &defaults,
            sandbox_id: "sandbox-1",
            gateway_hmac_secret: b"secret",
            env_vars: None,
            encrypted_secrets: Some(&secrets),
            channels: Some(&channels),
        };
        let materialized = materialize(input, &PassthroughDecryptor).unwrap();
        assert_eq!(materialized.sensitive.get("API_KEY").unwrap(), "super-secret");
        assert_eq!(
            materialized.sensitive.get("TELEGRAM_BOT_TOKEN").unwrap(),
            "tg-token"
        );
        assert!(materialized.sensitive.contains_key("OPENCLAW_GATEWAY_TOKEN"));

        let env_key = kiloclaw_crypto::generate_env_key();
        let sealed = seal_and_merge(materialized, &env_key).unwrap();
        assert!(sealed.get("KILOCLAW_ENC_API_KEY").unwrap().starts_with("enc:v1:"));
        assert!(sealed
            .get("KILOCLAW_ENC_OPENCLAW_GATEWAY_TOKEN")
            .unwrap()
            .starts_with("enc:v1:"));
    }

    #[test]
    fn rejects_reserved_prefix_end_to_end() {
        let mut env_vars = HashMap::new();
        env_vars.insert("KILOCLAW_ENC_HACK".to_string(), "x".to_string());

        let defaults = HashMap::new();
        let input = MaterializeInput {
            platform_defaults: &defaults,
            sandbox_id: "sandbox-1",
            gateway_hmac_secret: b"secret",
            env_vars: Some(&env_vars),
            encrypted_secrets: None,
            channels: None,
        };
        assert!(materialize(input, &PassthroughDecryptor).is_err());
    }
}
