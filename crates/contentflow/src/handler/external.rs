use std::io::Write;
use std::process::{Command, Stdio};

use serde_json::{json, Value};

use crate::config::ExternalStepConfig;

use super::{StepContext, StepError, StepHandler};

/// Runs a configured program for one step.
///
/// The program is called as `<program> <args...> <source path> <process id>`
/// with the pipeline state JSON on stdin. Whatever JSON it prints on stdout is
/// stored as the step's artifact.
pub struct ExternalCommandHandler {
    step: String,
    command: ExternalStepConfig,
}

impl ExternalCommandHandler {
    pub fn new(step: &str, command: ExternalStepConfig) -> Self {
        Self {
            step: step.to_string(),
            command,
        }
    }

    fn run(&self, ctx: &StepContext<'_>, stdin_payload: String) -> Result<Vec<u8>, StepError> {
        let program = &self.command.program;
        let source = ctx.source_file()?;
        let source_path = ctx.app.storage.path_for(ctx.process_id(), &source.name)?;

        log::debug!(
            "Running '{}' for step {} on {}",
            program,
            self.step,
            source_path.display()
        );

        let mut child = Command::new(program)
            .args(&self.command.args)
            .arg(&source_path)
            .arg(ctx.process_id())
            .env("CONTENTFLOW_PROCESS_ID", ctx.process_id())
            .env("CONTENTFLOW_STEP", &self.step)
            .env("CONTENTFLOW_STORAGE_DIR", ctx.app.storage.root())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| StepError::Spawn {
                program: program.clone(),
                source: e,
            })?;

        // Stdin is fed concurrently with draining stdout.
        let writer = child.stdin.take().map(|mut stdin| {
            std::thread::spawn(move || {
                if let Err(e) = stdin.write_all(stdin_payload.as_bytes()) {
                    log::debug!("Child stopped reading stdin: {}", e);
                }
            })
        });

        let output = child.wait_with_output().map_err(|e| StepError::Spawn {
            program: program.clone(),
            source: e,
        })?;
        if let Some(writer) = writer {
            let _ = writer.join();
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StepError::External {
                program: program.clone(),
                message: format!("{} ({})", stderr.trim(), output.status),
            });
        }

        Ok(output.stdout)
    }
}

impl StepHandler for ExternalCommandHandler {
    fn execute(&self, ctx: &mut StepContext<'_>) -> Result<Value, StepError> {
        let payload = ctx.state.to_json()?;
        let stdout = self.run(ctx, payload)?;

        let output: Value =
            serde_json::from_slice(&stdout).map_err(|e| StepError::InvalidArtifact {
                name: format!("stdout of '{}'", self.command.program),
                source: e,
            })?;

        let file_name = self.command.output_file_name(&self.step);
        let file = ctx.store_json_artifact(
            &file_name,
            self.command.artifact_type,
            &output,
            &format!("Output of '{}' has been added", self.command.program),
        )?;

        Ok(json!({ "result": "success", "file_name": file.name }))
    }
}
