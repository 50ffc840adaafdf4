//! Protocol constants from spec §6. Kept as plain `const`s rather than a
//! config struct: these are wire-format and state-machine invariants, not
//! deployment knobs.

/// Port the guest agent listens on inside every machine.
pub const OPENCLAW_PORT: u16 = 18789;

/// Per-attempt cap for `wait(started)` against the provider, imposed by the
/// provider itself.
pub const STARTUP_TIMEOUT_SECONDS: u64 = 60;

pub const ALARM_INTERVAL_RUNNING_MS: u64 = 5 * 60_000;
pub const ALARM_INTERVAL_DESTROYING_MS: u64 = 60_000;
pub const ALARM_INTERVAL_IDLE_MS: u64 = 30 * 60_000;
pub const ALARM_JITTER_MS: u64 = 60_000;

/// Consecutive dead-machine observations before the reconciler gives up and
/// marks the instance stopped.
pub const SELF_HEAL_THRESHOLD: u32 = 5;

/// How stale the cached `running` belief may be before `getStatus` dispatches
/// a fire-and-forget live check.
pub const LIVE_CHECK_THROTTLE_MS: u64 = 30_000;

/// Metadata-recovery is gated by the same cadence as the idle alarm so it
/// cannot be hammered by a flapping machine.
pub const METADATA_RECOVERY_COOLDOWN_MS: u64 = ALARM_INTERVAL_IDLE_MS;

pub const DEFAULT_VOLUME_SIZE_GB: u32 = 10;

pub const DEFAULT_MACHINE_CPUS: u32 = 2;
pub const DEFAULT_MACHINE_MEMORY_MB: u32 = 4096;
pub const DEFAULT_MACHINE_CPU_KIND: &str = "shared";

pub const METADATA_KEY_USER_ID: &str = "kiloclaw_user_id";
pub const METADATA_KEY_SANDBOX_ID: &str = "kiloclaw_sandbox_id";

/// Mount path every instance's volume is attached at.
pub const INSTANCE_MOUNT_PATH: &str = "/root";

/// Capacity-exhaustion markers the provider's error bodies are scanned for,
/// case-insensitively. See `kiloclaw-provider::error::insufficient_resources`.
pub const CAPACITY_MARKERS: &[&str] = &["insufficient resources", "insufficient memory"];

/// Reserved env-var prefixes a user may never supply directly.
pub const RESERVED_ENV_PREFIXES: &[&str] = &["KILOCLAW_ENC_", "KILOCLAW_ENV_"];

/// Prefix used for the encrypted-sensitive-value wire format: `enc:v1:<base64>`.
pub const ENC_WIRE_PREFIX: &str = "enc:v1:";

/// Fixed destination env-var names for decrypted channel bot-token envelopes.
pub const CHANNEL_ENV_TELEGRAM: &str = "TELEGRAM_BOT_TOKEN";
pub const CHANNEL_ENV_DISCORD: &str = "DISCORD_BOT_TOKEN";
pub const CHANNEL_ENV_SLACK_BOT: &str = "SLACK_BOT_TOKEN";
pub const CHANNEL_ENV_SLACK_APP: &str = "SLACK_APP_TOKEN";
