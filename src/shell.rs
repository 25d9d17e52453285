use std::env;

/// The shell user commands are handed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellType {
    Bash,
    PowerShell,
    Cmd,
}

impl ShellType {
    pub fn detect() -> Self {
        if !cfg!(windows) {
            return ShellType::Bash;
        }
        match env::var("PSModulePath") {
            Ok(modules) if !modules.is_empty() => ShellType::PowerShell,
            _ => ShellType::Cmd,
        }
    }

    /// Program and leading arguments; the command string goes last.
    pub fn get_shell_command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            ShellType::Bash => ("sh", &["-c"]),
            ShellType::PowerShell => ("powershell", &["-NoProfile", "-Command"]),
            ShellType::Cmd => ("cmd", &["/C"]),
        }
    }

    /// Package manager invocation used when installing a missing Python module.
    pub fn pip_program(&self) -> &'static str {
        match self {
            ShellType::Bash => "pip",
            ShellType::PowerShell | ShellType::Cmd => "python -m pip",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posix_shell_uses_sh_dash_c() {
        let (program, args) = ShellType::Bash.get_shell_command();
        assert_eq!(program, "sh");
        assert_eq!(args, &["-c"]);
    }

    #[test]
    fn windows_shells_go_through_python_for_pip() {
        assert_eq!(ShellType::Bash.pip_program(), "pip");
        assert_eq!(ShellType::Cmd.pip_program(), "python -m pip");
    }

    #[cfg(unix)]
    #[test]
    fn detects_bash_on_unix() {
        assert_eq!(ShellType::detect(), ShellType::Bash);
    }
}
