use std::{
    io::Write,
    path::PathBuf,
    process::{Command, Stdio},
    thread,
};

use termfit_optimizer::{GenerationProvider, GenerationRequest, ProviderError};

/// `sysexits.h` EX_TEMPFAIL: the provider asks to be retried.
const EXIT_TEMPFAIL: i32 = 75;

/// Runs an external program per request. The request is written to its stdin
/// as JSON and its stdout is taken as the candidate text.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandProvider {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl GenerationProvider for CommandProvider {
    fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        let keyword = request.keyword();
        let payload = serde_json::to_vec(request)
            .map_err(|err| ProviderError::Fatal(format!("encoding request: {err}")))?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                ProviderError::Fatal(format!("spawning {}: {err}", self.program.display()))
            })?;

        // fed from a thread: the child may fill stdout before draining stdin
        let writer = child.stdin.take().map(|mut stdin| {
            thread::spawn(move || {
                let _ = stdin.write_all(&payload);
            })
        });
        let output = child
            .wait_with_output()
            .map_err(|err| ProviderError::Fatal(format!("waiting for provider: {err}")))?;
        if let Some(writer) = writer {
            let _ = writer.join();
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            let message = if stderr.is_empty() {
                format!("provider exited with {} for '{keyword}'", output.status)
            } else {
                stderr
            };
            return Err(if output.status.code() == Some(EXIT_TEMPFAIL) {
                ProviderError::Transient(message)
            } else {
                ProviderError::classify(message)
            });
        }

        let text = String::from_utf8(output.stdout)
            .map_err(|_| ProviderError::Fatal(format!("provider output for '{keyword}' is not UTF-8")))?;
        let text = text.trim_end().to_string();
        if text.trim().is_empty() {
            return Err(ProviderError::Fatal(format!(
                "provider returned no text for '{keyword}'"
            )));
        }
        Ok(text)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use termfit_optimizer::{InitialRequest, ScriptRunTokenizer, TargetDeriver, TargetRanges};

    use super::*;

    fn request() -> GenerationRequest {
        let targets = TargetDeriver::new(Arc::new(ScriptRunTokenizer), None).derive("엔진오일", &[]);
        GenerationRequest::Initial(InitialRequest {
            keyword: "엔진오일".into(),
            targets,
            ranges: TargetRanges::default(),
            context: json!({}),
        })
    }

    fn sh(script: &str) -> CommandProvider {
        CommandProvider::new("sh", vec!["-c".into(), script.into()])
    }

    #[test]
    fn stdout_is_the_candidate() {
        let text = sh("cat >/dev/null; printf '엔진오일 본문\\n'")
            .generate(&request())
            .unwrap();
        assert_eq!(text, "엔진오일 본문");
    }

    #[test]
    fn request_arrives_as_json_on_stdin() {
        let text = sh(r#"grep -q '"stage":"initial"' && printf matched"#)
            .generate(&request())
            .unwrap();
        assert_eq!(text, "matched");
    }

    #[test]
    fn tempfail_exit_is_transient() {
        let err = sh("cat >/dev/null; exit 75").generate(&request()).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn overload_message_is_transient() {
        let err = sh("cat >/dev/null; echo 'Error code: 529 overloaded_error' >&2; exit 1")
            .generate(&request())
            .unwrap_err();
        assert_eq!(
            err,
            ProviderError::Transient("Error code: 529 overloaded_error".into())
        );
    }

    #[test]
    fn other_failures_are_fatal() {
        let err = sh("cat >/dev/null; echo 'invalid_request' >&2; exit 2")
            .generate(&request())
            .unwrap_err();
        assert_eq!(err, ProviderError::Fatal("invalid_request".into()));

        let err = sh("cat >/dev/null").generate(&request()).unwrap_err();
        assert_eq!(
            err,
            ProviderError::Fatal("provider returned no text for '엔진오일'".into())
        );

        let err = sh("cat >/dev/null; exit 3").generate(&request()).unwrap_err();
        let ProviderError::Fatal(message) = err else {
            panic!("silent non-zero exit should be fatal");
        };
        assert!(message.ends_with("for '엔진오일'"), "{message}");

        let missing = CommandProvider::new("/nonexistent/termfit-provider", Vec::new());
        assert!(!missing.generate(&request()).unwrap_err().is_transient());
    }
}
