//! Privilege escalation command construction and prompt recognition
//!
//! Builds the sudo wrapper around an already-composed command line and
//! provides the heuristic used to spot an interactive password prompt
//! that does not match the prompt we asked for. Only sudo is supported;
//! methods that need a controlling terminal (su, pbrun, pfexec) are not.

use std::borrow::Cow;

use uuid::Uuid;

/// The single escalation method this adapter supports.
pub const SUPPORTED_METHODS: &[&str] = &["sudo"];

/// How to become another user, as configured on the connection.
#[derive(Debug, Clone)]
pub struct BecomeConfig {
    /// Escalation method name; anything but `"sudo"` is rejected at
    /// request validation.
    pub method: String,
    /// Target user, `root` by default.
    pub user: String,
    /// Escalation executable, `sudo` by default.
    pub exe: String,
    /// Extra flags inserted before the sudo options.
    pub flags: String,
    /// Secret delivered on the child's stdin when a prompt appears.
    pub password: Option<String>,
}

impl Default for BecomeConfig {
    fn default() -> Self {
        BecomeConfig {
            method: "sudo".to_string(),
            user: "root".to_string(),
            exe: "sudo".to_string(),
            flags: "-H".to_string(),
            password: None,
        }
    }
}

/// A fully-built escalation invocation.
///
/// The launch line is opaque to the runner; prompt and success marker
/// drive the prompt-detection protocol.
#[derive(Debug, Clone)]
pub struct BecomeCommand {
    pub launch_line: String,
    pub prompt: String,
    pub success_marker: String,
}

/// Wrap `cmd` in a sudo invocation with a unique prompt and marker.
///
/// The wrapped command echoes the success marker before running `cmd`,
/// so seeing the marker on the child's output means authentication
/// succeeded without a prompt. The inner command is shell-quoted as a
/// single argument; the interpreter defaults to `/bin/sh`.
pub fn build_become_command(
    cmd: &str,
    config: &BecomeConfig,
    become_user: Option<&str>,
    executable: Option<&str>,
) -> BecomeCommand {
    let token = Uuid::new_v4().simple().to_string();
    let prompt = format!("[sudo via nsrun, key={token}] password:");
    let success_marker = format!("BECOME-SUCCESS-{token}");

    let user = become_user.unwrap_or(&config.user);
    let shell = executable.unwrap_or("/bin/sh");
    let inner = format!("echo {success_marker}; {cmd}");
    let quoted = shell_escape::escape(Cow::from(inner));

    let launch_line = format!(
        "{exe} {flags} -S -p \"{prompt}\" -u {user} {shell} -c {quoted}",
        exe = config.exe,
        flags = config.flags,
    );

    BecomeCommand {
        launch_line,
        prompt,
        success_marker,
    }
}

/// Does the accumulated output end in something that looks like an
/// interactive password prompt?
///
/// Matches the trailing line against common localized spellings of
/// "Password:", case-insensitively, with optional whitespace around the
/// colon. Used when the child prompts with text other than the prompt we
/// configured (e.g. a nested su inside the container).
pub fn check_password_prompt(output: &str) -> bool {
    let pattern = regex::Regex::new(
        r"(?i)(password|passwort|contraseña|contrasenya|mot de passe|senha|lozinka|пароль|密码|密碼|암호|パスワード)\s*:\s*$",
    )
    .expect("valid prompt pattern");
    pattern.is_match(output.trim_end_matches([' ', '\t']))
}
