use super::{Confidence, ErrorType, Solution};

/// Static template solutions per error type. Commands may carry `{variable}`
/// placeholders for the resolver to fill.
pub fn common_solutions(error_type: ErrorType) -> Vec<Solution> {
    match error_type {
        ErrorType::PythonImportError => vec![Solution::command(
            "Install the missing package",
            "pip install {package_name}",
        )
        .with_confidence(Confidence::High)],
        ErrorType::PythonModuleNotFound => vec![Solution::command(
            "Install the missing module",
            "pip install {module_name}",
        )
        .with_confidence(Confidence::High)],
        ErrorType::PythonSyntaxError => {
            vec![Solution::advice("Check the syntax at the indicated line")]
        }
        ErrorType::PythonTypeError => vec![Solution::advice(
            "Check the types of the values passed at the failing call",
        )],
        ErrorType::PythonValueError => vec![Solution::advice(
            "Validate the input before converting or unpacking it",
        )],
        ErrorType::PythonAttributeError => vec![
            Solution::advice("Check the attribute name for typos"),
            Solution::advice("Make sure the object is not None before using it"),
        ],
        ErrorType::ShellCommandNotFound => vec![
            Solution::command(
                "Install the missing command (Debian/Ubuntu)",
                "apt-get install {command_name}",
            ),
            Solution::advice("Check if the command is in your PATH"),
        ],
        ErrorType::FileNotFound => vec![
            Solution::command("Create the missing directory", "mkdir -p {directory_path}"),
            Solution::advice("Check the file path and current directory"),
        ],
        ErrorType::PermissionDenied => vec![
            Solution::command("Change file permissions", "chmod +x {file_path}"),
            Solution::command("Run with sudo (if appropriate)", "sudo {original_command}")
                .with_confidence(Confidence::Low),
        ],
        ErrorType::GitNotARepo => vec![
            Solution::command("Initialize a git repository", "git init")
                .with_confidence(Confidence::High),
            Solution::advice("Change to the correct directory"),
        ],
        ErrorType::GitConnectionError => vec![
            Solution::command("Check the configured remote URL", "git remote -v"),
            Solution::advice("Check network connectivity and proxy or certificate settings"),
        ],
        ErrorType::GitPushError => vec![Solution::command(
            "Integrate remote changes before pushing",
            "git pull --rebase",
        )],
        ErrorType::PipPackageNotFound => vec![
            Solution::advice("Check the package name spelling"),
            Solution::command(
                "Try specifying an older version",
                "pip install {package_name}=={version}",
            )
            .with_confidence(Confidence::Low),
            Solution::advice("Look for alternative packages"),
        ],
        ErrorType::Timeout => vec![
            Solution::advice("Check whether the command is waiting for input or a network resource"),
            Solution::advice("Increase the executor timeout for long-running commands"),
        ],
        ErrorType::MemoryError => vec![Solution::advice(
            "Process the data in smaller chunks or increase available memory",
        )],
        ErrorType::SegmentationFault => vec![Solution::advice(
            "Reinstall or update the native extension that crashed",
        )],
        ErrorType::ReactHookConditional => vec![Solution::advice(
            "Move the hook call to the top level of the component, above any condition",
        )
        .with_confidence(Confidence::High)],
        ErrorType::ReactInvalidElement => vec![
            Solution::advice("Check that the rendered component is exported"),
            Solution::advice("Check default versus named imports"),
        ],
        ErrorType::JsUndefinedProperty => vec![
            Solution::advice("Guard the property access with a null check"),
            Solution::advice("Use optional chaining (?.) for values that may not be loaded yet"),
        ],
        ErrorType::ReactModuleNotFound => vec![
            Solution::command("Install the missing package", "npm install {npm_package}")
                .with_confidence(Confidence::High),
            Solution::advice("Check the import path"),
        ],
        ErrorType::NpmPackageNotFound => vec![
            Solution::command("Check that the package exists on the registry", "npm view {npm_package}"),
            Solution::advice("Check the package name spelling and registry authentication"),
        ],
        ErrorType::NpmInvalidSelfOperation => vec![Solution::advice(
            "Rename the project in package.json or run the install from another directory",
        )],
        ErrorType::NpmPermissionError => vec![
            Solution::command("Clear the npm cache", "npm cache clean --force")
                .with_confidence(Confidence::Low),
            Solution::advice("Close programs that may be locking node_modules"),
        ],
        ErrorType::Unknown => vec![Solution::advice("Search for the error message online")],
    }
}

/// Template the install strategy runs for a given error type, if any.
pub fn install_template(error_type: ErrorType) -> Option<&'static str> {
    match error_type {
        ErrorType::PythonImportError | ErrorType::PythonModuleNotFound => {
            Some("pip install {package_name}")
        }
        ErrorType::NpmPackageNotFound | ErrorType::ReactModuleNotFound => {
            Some("npm install {npm_package}")
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_type_has_at_least_one_solution() {
        for ty in [
            ErrorType::PythonImportError,
            ErrorType::FileNotFound,
            ErrorType::NpmPermissionError,
            ErrorType::Unknown,
        ] {
            assert!(!common_solutions(ty).is_empty());
        }
    }

    #[test]
    fn template_variables_are_declared() {
        let solutions = common_solutions(ErrorType::PipPackageNotFound);
        let pinned = solutions
            .iter()
            .find(|s| s.command_template.is_some())
            .unwrap();
        assert!(pinned.variables.contains("package_name"));
        assert!(pinned.variables.contains("version"));
    }
}
