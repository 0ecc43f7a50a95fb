// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;

use crate::app::adaptor::Adaptor;
use crate::app::errors::{AdaptorError, AdaptorResult};
use crate::app::job::Job;
use crate::app::ports::transport::Transport;
use crate::app::status::JobStatus;
use crate::app::types::{AdaptorConfig, FetchedResults, RunDetails};

pub(crate) const WRAPPER_NAME: &str = "run.sh";
pub(crate) const EXIT_MARKER: &str = ".exit_code";
pub(crate) const STDOUT_NAME: &str = "job.stdout";
pub(crate) const STDERR_NAME: &str = "job.stderr";

/// Wrapper installed into every workspace. Recording the exit code to a
/// marker file is what makes polling and result retrieval uniform across
/// plain shells and schedulers.
pub(crate) fn wrapper_script(workspace: &str, command: &str, command_line: &str) -> String {
    format!(
        "#!/bin/sh\n\
         cd \"{workspace}\" || exit 1\n\
         {command} {command_line} > {STDOUT_NAME} 2> {STDERR_NAME}\n\
         echo $? > {EXIT_MARKER}\n"
    )
}

pub(crate) fn workspace_path(transport: &dyn Transport, job: &Job) -> String {
    format!(
        "{}/{}",
        transport.workspace_root().trim_end_matches('/'),
        job.slug()
    )
}

/// Creates the remote workspace, uploads every input file from the job
/// working dir, and installs the wrapper script plus any extra staged files.
pub(crate) async fn stage_workspace(
    transport: &dyn Transport,
    job: &Job,
    command: &str,
    extra_files: &[(String, String)],
) -> AdaptorResult<String> {
    let workspace = workspace_path(transport, job);
    transport.make_dir(&workspace).await?;

    let entries = std::fs::read_dir(&job.working_dir).map_err(|err| {
        AdaptorError::internal(format!(
            "cannot read working dir {}: {err}",
            job.working_dir.display()
        ))
    })?;
    for entry in entries {
        let entry = entry.map_err(|err| {
            AdaptorError::internal(format!(
                "cannot read working dir {}: {err}",
                job.working_dir.display()
            ))
        })?;
        if !entry.path().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        transport
            .upload_file(&entry.path(), &format!("{workspace}/{name}"))
            .await?;
    }

    let script = wrapper_script(&workspace, command, &job.command_line);
    install_staged_file(transport, job, &workspace, WRAPPER_NAME, &script).await?;
    for (name, content) in extra_files {
        install_staged_file(transport, job, &workspace, name, content).await?;
    }
    Ok(workspace)
}

async fn install_staged_file(
    transport: &dyn Transport,
    job: &Job,
    workspace: &str,
    name: &str,
    content: &str,
) -> AdaptorResult<()> {
    // Written locally first so the job working dir keeps a copy of what ran.
    let local = job.working_dir.join(name);
    std::fs::write(&local, content).map_err(|err| {
        AdaptorError::internal(format!("cannot write {}: {err}", local.display()))
    })?;
    transport
        .upload_file(&local, &format!("{workspace}/{name}"))
        .await
}

/// Downloads every file in the workspace into the job working dir and
/// reads the recorded exit code.
pub(crate) async fn collect_results(
    transport: &dyn Transport,
    job: &Job,
) -> AdaptorResult<FetchedResults> {
    let workspace = workspace_path(transport, job);
    for name in transport.list_dir(&workspace).await? {
        transport
            .download_file(&format!("{workspace}/{name}"), &job.working_dir.join(&name))
            .await?;
    }
    let exit_code = read_exit_code(transport, &workspace).await?;
    let stderr_empty = file_is_empty(&job.working_dir.join(STDERR_NAME));
    Ok(FetchedResults {
        exit_code,
        stderr_empty,
    })
}

pub(crate) async fn read_exit_code(
    transport: &dyn Transport,
    workspace: &str,
) -> AdaptorResult<i32> {
    let capture = transport
        .exec_capture(&format!("cat \"{workspace}/{EXIT_MARKER}\""))
        .await?;
    if capture.exit_code != 0 {
        return Err(AdaptorError::exec(format!(
            "exit code marker missing in {workspace}"
        )));
    }
    capture
        .stdout_utf8()
        .trim()
        .parse::<i32>()
        .map_err(|_| AdaptorError::exec(format!("garbled exit code marker in {workspace}")))
}

fn file_is_empty(path: &Path) -> bool {
    std::fs::metadata(path).map(|meta| meta.len() == 0).unwrap_or(true)
}

/// Native states a plain shell backend can report.
fn map_native_state(state: &str) -> JobStatus {
    match state {
        "RUNNING" => JobStatus::Running,
        "DONE" => JobStatus::Completed,
        _ => JobStatus::Undefined,
    }
}

/// Runs jobs through a plain shell: detached launch with the process id as
/// the backend identifier, polling by pid probe and exit-code marker.
pub struct ShellAdaptor {
    name: String,
    transport: Box<dyn Transport>,
    command: String,
    config: AdaptorConfig,
}

impl ShellAdaptor {
    pub fn new(
        name: impl Into<String>,
        transport: Box<dyn Transport>,
        command: impl Into<String>,
        config: AdaptorConfig,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            command: command.into(),
            config,
        }
    }

    fn ensure_connected(&self) -> AdaptorResult<()> {
        if self.transport.connected() {
            Ok(())
        } else {
            Err(AdaptorError::internal("adaptor used before connect"))
        }
    }

    fn remote_pid<'a>(&self, job: &'a Job) -> AdaptorResult<&'a str> {
        job.remote_job_id().ok_or_else(|| {
            AdaptorError::inconsistent_state(format!(
                "job {} has no backend identifier yet",
                job.slug()
            ))
        })
    }
}

#[async_trait]
impl Adaptor for ShellAdaptor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> AdaptorResult<()> {
        self.transport.connect().await
    }

    async fn disconnect(&mut self) {
        self.transport.disconnect().await;
    }

    fn connected(&self) -> bool {
        self.transport.connected()
    }

    async fn prepare(&mut self, job: &Job) -> AdaptorResult<()> {
        self.ensure_connected()?;
        job.ensure_exact(JobStatus::Created)?;
        stage_workspace(self.transport.as_ref(), job, &self.command, &[]).await?;
        Ok(())
    }

    async fn run(&mut self, job: &Job) -> AdaptorResult<String> {
        self.ensure_connected()?;
        job.ensure_exact(JobStatus::Prepared)?;
        let workspace = workspace_path(self.transport.as_ref(), job);
        let capture = self
            .transport
            .exec_capture(&format!(
                "cd \"{workspace}\" && nohup sh {WRAPPER_NAME} > /dev/null 2>&1 & echo $!"
            ))
            .await?;
        if capture.exit_code != 0 {
            return Err(AdaptorError::exec(format!(
                "launch failed with exit code {}: {}",
                capture.exit_code,
                capture.stderr_utf8().trim()
            )));
        }
        let pid = capture.stdout_utf8().trim().to_string();
        if pid.is_empty() || pid.parse::<u32>().is_err() {
            return Err(AdaptorError::exec(format!(
                "launch did not report a process id (got '{pid}')"
            )));
        }
        Ok(pid)
    }

    async fn cancel(&mut self, job: &Job) -> AdaptorResult<()> {
        self.ensure_connected()?;
        let pid = self.remote_pid(job)?;
        let capture = self
            .transport
            .exec_capture(&format!("kill {pid} 2>/dev/null"))
            .await?;
        if capture.exit_code != 0 {
            return Err(AdaptorError::exec(format!(
                "kill {pid} failed; process already gone?"
            )));
        }
        Ok(())
    }

    async fn poll_status(&mut self, job: &Job) -> AdaptorResult<JobStatus> {
        self.ensure_connected()?;
        let pid = self.remote_pid(job)?;
        let workspace = workspace_path(self.transport.as_ref(), job);
        let capture = self
            .transport
            .exec_capture(&format!(
                "if [ -f \"{workspace}/{EXIT_MARKER}\" ]; then echo DONE; \
                 elif kill -0 {pid} 2>/dev/null; then echo RUNNING; \
                 else echo LOST; fi"
            ))
            .await?;
        Ok(map_native_state(capture.stdout_utf8().trim()))
    }

    async fn fetch_results(&mut self, job: &Job) -> AdaptorResult<FetchedResults> {
        self.ensure_connected()?;
        job.ensure_exact(JobStatus::Completed)?;
        collect_results(self.transport.as_ref(), job).await
    }

    async fn fetch_run_details(&mut self, job: &Job) -> AdaptorResult<RunDetails> {
        self.ensure_connected()?;
        let mut details = job.default_run_details();
        let capture = self.transport.exec_capture("hostname").await?;
        if capture.exit_code == 0 {
            details.extra = Some(capture.stdout_utf8().trim().to_string());
        }
        Ok(details)
    }

    fn serialize(&self) -> AdaptorConfig {
        self.config.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local::LocalTransport;
    use crate::app::types::AdaptorConfig;
    use tempfile::TempDir;

    const NOW: &str = "2026-02-11T10:00:00Z";

    fn local_job(dir: &TempDir, command_line: &str) -> Job {
        Job::create(
            "shell-test",
            "shell test",
            command_line,
            AdaptorConfig::new("local.shell").with_param("command", "echo"),
            dir.path(),
            NOW,
        )
        .unwrap()
    }

    fn local_adaptor(dir: &TempDir, command: &str) -> ShellAdaptor {
        let root = dir.path().to_string_lossy().into_owned();
        ShellAdaptor::new(
            "local.shell",
            Box::new(LocalTransport::new(root)),
            command,
            AdaptorConfig::new("local.shell").with_param("command", command),
        )
    }

    #[test]
    fn wrapper_records_exit_code() {
        let script = wrapper_script("/work/jobs/x", "/bin/echo", "hello");
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("cd \"/work/jobs/x\""));
        assert!(script.contains("/bin/echo hello > job.stdout 2> job.stderr"));
        assert!(script.contains("echo $? > .exit_code"));
    }

    #[test]
    fn native_state_mapping() {
        assert_eq!(map_native_state("RUNNING"), JobStatus::Running);
        assert_eq!(map_native_state("DONE"), JobStatus::Completed);
        assert_eq!(map_native_state("LOST"), JobStatus::Undefined);
        assert_eq!(map_native_state("whatever"), JobStatus::Undefined);
    }

    #[tokio::test]
    async fn operations_fail_before_connect() {
        let dir = TempDir::new().unwrap();
        let job = local_job(&dir, "hi");
        let mut adaptor = local_adaptor(&dir, "echo");
        assert!(adaptor.prepare(&job).await.is_err());
    }

    #[tokio::test]
    async fn prepare_rejects_wrong_status() {
        let dir = TempDir::new().unwrap();
        let mut job = local_job(&dir, "hi");
        job.set_status(JobStatus::Prepared, "p", NOW).unwrap();
        let mut adaptor = local_adaptor(&dir, "echo");
        adaptor.connect().await.unwrap();
        let err = adaptor.prepare(&job).await.unwrap_err();
        assert_eq!(
            err.kind(),
            crate::app::errors::AdaptorErrorKind::InconsistentState
        );
    }

    #[tokio::test]
    async fn full_local_lifecycle_reaches_completion() {
        let dir = TempDir::new().unwrap();
        let mut job = local_job(&dir, "hello");
        let mut adaptor = local_adaptor(&dir, "echo");
        adaptor.connect().await.unwrap();

        adaptor.prepare(&job).await.unwrap();
        assert!(job.working_dir.join(WRAPPER_NAME).is_file());
        job.set_status(JobStatus::Prepared, "p", NOW).unwrap();

        let pid = adaptor.run(&job).await.unwrap();
        job.assign_remote_id(pid);
        job.set_status(JobStatus::Queued, "q", NOW).unwrap();

        // echo finishes quickly; wait for the exit marker to land.
        let mut status = JobStatus::Queued;
        for _ in 0..100 {
            status = adaptor.poll_status(&job).await.unwrap();
            if status == JobStatus::Completed {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        assert_eq!(status, JobStatus::Completed);
        job.set_status(JobStatus::Completed, "c", NOW).unwrap();

        let results = adaptor.fetch_results(&job).await.unwrap();
        assert_eq!(results.exit_code, 0);
        assert!(results.stderr_empty);
        let stdout = std::fs::read_to_string(job.working_dir.join(STDOUT_NAME)).unwrap();
        assert_eq!(stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut job = Job::create(
            "shell-fail",
            "failing job",
            "-c 'exit 7'",
            AdaptorConfig::new("local.shell").with_param("command", "sh"),
            dir.path(),
            NOW,
        )
        .unwrap();
        let mut adaptor = local_adaptor(&dir, "sh");
        adaptor.connect().await.unwrap();

        adaptor.prepare(&job).await.unwrap();
        job.set_status(JobStatus::Prepared, "p", NOW).unwrap();
        let pid = adaptor.run(&job).await.unwrap();
        job.assign_remote_id(pid);
        job.set_status(JobStatus::Queued, "q", NOW).unwrap();

        let mut status = JobStatus::Queued;
        for _ in 0..100 {
            status = adaptor.poll_status(&job).await.unwrap();
            if status == JobStatus::Completed {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        assert_eq!(status, JobStatus::Completed);
        job.set_status(JobStatus::Completed, "c", NOW).unwrap();

        let results = adaptor.fetch_results(&job).await.unwrap();
        assert_eq!(results.exit_code, 7);
    }

    #[tokio::test]
    async fn poll_without_remote_id_is_inconsistent() {
        let dir = TempDir::new().unwrap();
        let job = local_job(&dir, "hi");
        let mut adaptor = local_adaptor(&dir, "echo");
        adaptor.connect().await.unwrap();
        let err = adaptor.poll_status(&job).await.unwrap_err();
        assert_eq!(
            err.kind(),
            crate::app::errors::AdaptorErrorKind::InconsistentState
        );
    }
}
