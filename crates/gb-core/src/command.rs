//! Building remote shell command lines
//!
//! Only values gpubox itself owns (working directory, script names, argv from
//! the local command line, injected environment) are quoted here. A command
//! string given to `run` is passed through untouched.

use shell_escape::escape;
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Shell-escape a single word
pub fn shell_quote(s: &str) -> Cow<'_, str> {
    escape(Cow::Borrowed(s))
}

/// Quote a remote path while keeping a leading `~/` expandable
pub fn remote_path_expr(path: &str) -> String {
    if path == "~" {
        return "\"$HOME\"".to_string();
    }
    match path.strip_prefix("~/") {
        Some(rest) if rest.is_empty() => "\"$HOME\"".to_string(),
        Some(rest) => format!("\"$HOME\"/{}", shell_quote(rest)),
        None => shell_quote(path).into_owned(),
    }
}

/// Join a file name onto a remote directory
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// `cd <dir> && <command>`, with `command` left verbatim
pub fn in_working_dir(dir: &str, command: &str) -> String {
    format!("cd {} && {}", remote_path_expr(dir), command)
}

/// Interpreter invocation of a synced script with optional environment
pub fn script_command(
    interpreter: &str,
    script: &str,
    args: &[String],
    env: &BTreeMap<String, String>,
) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(env.len() + args.len() + 2);
    for (key, value) in env {
        parts.push(format!("{}={}", key, shell_quote(value)));
    }
    parts.push(interpreter.to_string());
    parts.push(shell_quote(script).into_owned());
    parts.extend(args.iter().map(|a| shell_quote(a).into_owned()));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_home_relative_dir_stays_expandable() {
        assert_eq!(remote_path_expr("~/work"), "\"$HOME\"/work");
        assert_eq!(remote_path_expr("~/my runs"), "\"$HOME\"/'my runs'");
        assert_eq!(remote_path_expr("~"), "\"$HOME\"");
        assert_eq!(remote_path_expr("/srv/data"), "/srv/data");
    }

    #[test]
    fn test_command_is_not_touched() {
        let cmd = in_working_dir("/srv/data", "echo $CUDA_HOME | tee 'out file'");
        assert_eq!(cmd, "cd /srv/data && echo $CUDA_HOME | tee 'out file'");
    }

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("~/work", "train.py"), "~/work/train.py");
        assert_eq!(join_remote("/srv/", "train.py"), "/srv/train.py");
    }

    #[test]
    fn test_script_command_with_env() {
        let mut env = BTreeMap::new();
        env.insert("CUDA_VISIBLE_DEVICES".to_string(), "0,1".to_string());
        let cmd = script_command(
            "python3",
            "train.py",
            &["--lr".to_string(), "1e-3".to_string(), "my run".to_string()],
            &env,
        );
        assert_eq!(
            cmd,
            "CUDA_VISIBLE_DEVICES=0,1 python3 train.py --lr 1e-3 'my run'"
        );
    }

    #[test]
    fn test_script_command_without_env() {
        let cmd = script_command("python3", "eval.py", &[], &BTreeMap::new());
        assert_eq!(cmd, "python3 eval.py");
    }
}
