// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::str::FromStr;

use async_trait::async_trait;

use crate::adapters::shell::{WRAPPER_NAME, collect_results, stage_workspace, workspace_path};
use crate::app::adaptor::Adaptor;
use crate::app::errors::{AdaptorError, AdaptorResult};
use crate::app::job::Job;
use crate::app::ports::transport::Transport;
use crate::app::status::JobStatus;
use crate::app::types::{AdaptorConfig, FetchedResults, RunDetails};

/// Batch schedulers the cluster adaptor can drive. Each flavor knows its
/// submit/query/delete commands and its native-state table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterFlavor {
    Sge,
    Slurm,
    Pbs,
    Lsf,
    Torque,
    Condor,
}

impl FromStr for ClusterFlavor {
    type Err = AdaptorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "sge" => Ok(Self::Sge),
            "slurm" => Ok(Self::Slurm),
            "pbs" => Ok(Self::Pbs),
            "lsf" => Ok(Self::Lsf),
            "torque" => Ok(Self::Torque),
            "condor" => Ok(Self::Condor),
            other => Err(AdaptorError::not_available(format!(
                "unknown cluster flavor '{other}'"
            ))),
        }
    }
}

impl ClusterFlavor {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sge => "sge",
            Self::Slurm => "slurm",
            Self::Pbs => "pbs",
            Self::Lsf => "lsf",
            Self::Torque => "torque",
            Self::Condor => "condor",
        }
    }

    fn submit_command(self, workspace: &str, queue: Option<&str>) -> String {
        let out = format!("{workspace}/scheduler.stdout");
        let err = format!("{workspace}/scheduler.stderr");
        match self {
            Self::Slurm => {
                let queue = queue.map(|q| format!(" -p {q}")).unwrap_or_default();
                format!("sbatch -D \"{workspace}\" -o \"{out}\" -e \"{err}\"{queue} \"{workspace}/{WRAPPER_NAME}\"")
            }
            Self::Sge => {
                let queue = queue.map(|q| format!(" -q {q}")).unwrap_or_default();
                format!("qsub -wd \"{workspace}\" -o \"{out}\" -e \"{err}\"{queue} \"{workspace}/{WRAPPER_NAME}\"")
            }
            Self::Pbs | Self::Torque => {
                let queue = queue.map(|q| format!(" -q {q}")).unwrap_or_default();
                format!("cd \"{workspace}\" && qsub -o \"{out}\" -e \"{err}\"{queue} {WRAPPER_NAME}")
            }
            Self::Lsf => {
                let queue = queue.map(|q| format!(" -q {q}")).unwrap_or_default();
                format!("cd \"{workspace}\" && bsub -o \"{out}\" -e \"{err}\"{queue} sh {WRAPPER_NAME}")
            }
            Self::Condor => {
                format!("cd \"{workspace}\" && condor_submit -terse {SUBMIT_DESCRIPTOR}")
            }
        }
    }

    fn parse_submit_output(self, stdout: &str) -> AdaptorResult<String> {
        let garbled = || {
            AdaptorError::exec(format!(
                "{} submission output not understood: '{}'",
                self.as_str(),
                stdout.trim()
            ))
        };
        let line = stdout.lines().find(|l| !l.trim().is_empty()).ok_or_else(garbled)?;
        let id = match self {
            // "Submitted batch job 1234"
            Self::Slurm => line.split_whitespace().last(),
            // "Your job 1234 ("..." ) has been submitted"
            Self::Sge => line.split_whitespace().nth(2),
            // "1234.head-node"
            Self::Pbs | Self::Torque => line.split_whitespace().next(),
            // "Job <1234> is submitted to queue <normal>."
            Self::Lsf => line.split('<').nth(1).and_then(|rest| rest.split('>').next()),
            // "1234.0 - 1234.0"
            Self::Condor => line.split_whitespace().next().and_then(|t| t.split('.').next()),
        };
        match id {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => Err(garbled()),
        }
    }

    fn status_command(self, remote_id: &str) -> String {
        match self {
            Self::Slurm => format!("squeue -h -j {remote_id} -o %T"),
            Self::Sge => format!("qstat | awk -v id={remote_id} '$1 == id {{print $5}}'"),
            Self::Pbs | Self::Torque => {
                format!("qstat -f {remote_id} 2>/dev/null | awk -F'= ' '/job_state/ {{print $2}}'")
            }
            Self::Lsf => format!("bjobs -noheader -o stat {remote_id} 2>/dev/null"),
            Self::Condor => format!("condor_q -format '%d' JobStatus {remote_id}"),
        }
    }

    /// Maps a native scheduler state to a job status. An empty report means
    /// the scheduler already forgot the job, which for every flavor here
    /// means it left the queue; the exit-code marker decides how it ended.
    fn map_native_state(self, state: &str) -> JobStatus {
        if state.is_empty() {
            return JobStatus::Completed;
        }
        match self {
            Self::Slurm => match state {
                "PENDING" | "CONFIGURING" | "PREEMPTED" | "REQUEUED" => JobStatus::Queued,
                "RUNNING" | "COMPLETING" => JobStatus::Running,
                "SUSPENDED" => JobStatus::Suspended,
                "COMPLETED" => JobStatus::Completed,
                "CANCELLED" => JobStatus::Cancelled,
                "FAILED" | "TIMEOUT" | "NODE_FAIL" | "OUT_OF_MEMORY" => JobStatus::Error,
                _ => JobStatus::Undefined,
            },
            Self::Sge => match state {
                "qw" | "hqw" | "hRwq" => JobStatus::Queued,
                "r" | "t" | "Rr" | "Rt" => JobStatus::Running,
                "s" | "ts" | "S" | "tS" => JobStatus::Suspended,
                "dr" | "dt" | "dS" => JobStatus::Cancelled,
                "Eqw" | "Ehqw" => JobStatus::Error,
                _ => JobStatus::Undefined,
            },
            Self::Pbs | Self::Torque => match state {
                "Q" | "H" | "W" | "T" => JobStatus::Queued,
                "R" | "E" => JobStatus::Running,
                "S" => JobStatus::Suspended,
                "C" | "F" => JobStatus::Completed,
                _ => JobStatus::Undefined,
            },
            Self::Lsf => match state {
                "PEND" | "WAIT" => JobStatus::Queued,
                "RUN" => JobStatus::Running,
                "PSUSP" | "USUSP" | "SSUSP" => JobStatus::Suspended,
                "DONE" => JobStatus::Completed,
                "EXIT" => JobStatus::Error,
                _ => JobStatus::Undefined,
            },
            Self::Condor => match state {
                "1" => JobStatus::Queued,
                "2" | "6" => JobStatus::Running,
                "3" => JobStatus::Cancelled,
                "4" => JobStatus::Completed,
                "5" | "7" => JobStatus::Suspended,
                _ => JobStatus::Undefined,
            },
        }
    }

    fn cancel_command(self, remote_id: &str) -> String {
        match self {
            Self::Slurm => format!("scancel {remote_id}"),
            Self::Sge | Self::Pbs | Self::Torque => format!("qdel {remote_id}"),
            Self::Lsf => format!("bkill {remote_id}"),
            Self::Condor => format!("condor_rm {remote_id}"),
        }
    }

    /// Condor drives submission through a descriptor file staged next to
    /// the wrapper; the other flavors submit the wrapper directly.
    fn extra_staged_file(self, queue: Option<&str>) -> Option<(String, String)> {
        if self != Self::Condor {
            return None;
        }
        let requirements = queue
            .map(|q| format!("requirements = (Machine == \"{q}\")\n"))
            .unwrap_or_default();
        let content = format!(
            "executable = {WRAPPER_NAME}\n\
             universe = vanilla\n\
             output = scheduler.stdout\n\
             error = scheduler.stderr\n\
             log = scheduler.log\n\
             {requirements}\
             queue 1\n"
        );
        Some((SUBMIT_DESCRIPTOR.to_string(), content))
    }
}

const SUBMIT_DESCRIPTOR: &str = "job.sub";

/// Runs jobs through a batch scheduler reachable over the transport. The
/// staging protocol is the shell adaptor's; only launch, polling and
/// cancellation go through the scheduler.
pub struct ClusterAdaptor {
    name: String,
    transport: Box<dyn Transport>,
    flavor: ClusterFlavor,
    command: String,
    queue: Option<String>,
    config: AdaptorConfig,
}

impl ClusterAdaptor {
    pub fn new(
        name: impl Into<String>,
        transport: Box<dyn Transport>,
        flavor: ClusterFlavor,
        command: impl Into<String>,
        queue: Option<String>,
        config: AdaptorConfig,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            flavor,
            command: command.into(),
            queue,
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

    fn remote_id<'a>(&self, job: &'a Job) -> AdaptorResult<&'a str> {
        job.remote_job_id().ok_or_else(|| {
            AdaptorError::inconsistent_state(format!(
                "job {} has no scheduler identifier yet",
                job.slug()
            ))
        })
    }
}

#[async_trait]
impl Adaptor for ClusterAdaptor {
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
        let extra: Vec<(String, String)> = self
            .flavor
            .extra_staged_file(self.queue.as_deref())
            .into_iter()
            .collect();
        stage_workspace(self.transport.as_ref(), job, &self.command, &extra).await?;
        Ok(())
    }

    async fn run(&mut self, job: &Job) -> AdaptorResult<String> {
        self.ensure_connected()?;
        job.ensure_exact(JobStatus::Prepared)?;
        let workspace = workspace_path(self.transport.as_ref(), job);
        let cmd = self.flavor.submit_command(&workspace, self.queue.as_deref());
        let capture = self.transport.exec_capture(&cmd).await?;
        if capture.exit_code != 0 {
            return Err(AdaptorError::exec(format!(
                "{} submission failed with exit code {}: {}",
                self.flavor.as_str(),
                capture.exit_code,
                capture.stderr_utf8().trim()
            )));
        }
        self.flavor.parse_submit_output(&capture.stdout_utf8())
    }

    async fn cancel(&mut self, job: &Job) -> AdaptorResult<()> {
        self.ensure_connected()?;
        let remote_id = self.remote_id(job)?;
        let capture = self
            .transport
            .exec_capture(&self.flavor.cancel_command(remote_id))
            .await?;
        if capture.exit_code != 0 {
            return Err(AdaptorError::exec(format!(
                "{} refused to cancel job {remote_id}: {}",
                self.flavor.as_str(),
                capture.stderr_utf8().trim()
            )));
        }
        Ok(())
    }

    async fn poll_status(&mut self, job: &Job) -> AdaptorResult<JobStatus> {
        self.ensure_connected()?;
        let remote_id = self.remote_id(job)?;
        let capture = self
            .transport
            .exec_capture(&self.flavor.status_command(remote_id))
            .await?;
        let native = capture.stdout_utf8();
        let native = native.trim();
        let status = self.flavor.map_native_state(native);
        tracing::debug!(
            slug = job.slug(),
            flavor = self.flavor.as_str(),
            native,
            status = %status,
            "scheduler state polled"
        );
        Ok(status)
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

    #[test]
    fn flavor_parses_from_string() {
        assert_eq!(ClusterFlavor::from_str("slurm").unwrap(), ClusterFlavor::Slurm);
        assert_eq!(ClusterFlavor::from_str("SGE").unwrap(), ClusterFlavor::Sge);
        assert!(ClusterFlavor::from_str("k8s").is_err());
    }

    #[test]
    fn slurm_submit_output() {
        let id = ClusterFlavor::Slurm
            .parse_submit_output("Submitted batch job 123456\n")
            .unwrap();
        assert_eq!(id, "123456");
    }

    #[test]
    fn sge_submit_output() {
        let id = ClusterFlavor::Sge
            .parse_submit_output("Your job 98765 (\"run.sh\") has been submitted\n")
            .unwrap();
        assert_eq!(id, "98765");
    }

    #[test]
    fn pbs_submit_output() {
        let id = ClusterFlavor::Pbs.parse_submit_output("4242.head-node\n").unwrap();
        assert_eq!(id, "4242.head-node");
    }

    #[test]
    fn lsf_submit_output() {
        let id = ClusterFlavor::Lsf
            .parse_submit_output("Job <777> is submitted to queue <normal>.\n")
            .unwrap();
        assert_eq!(id, "777");
    }

    #[test]
    fn condor_submit_output() {
        let id = ClusterFlavor::Condor.parse_submit_output("27.0 - 27.0\n").unwrap();
        assert_eq!(id, "27");
    }

    #[test]
    fn garbled_submit_output_is_an_error() {
        assert!(ClusterFlavor::Slurm.parse_submit_output("").is_err());
        assert!(ClusterFlavor::Lsf.parse_submit_output("no angle brackets").is_err());
    }

    #[test]
    fn slurm_state_table() {
        let f = ClusterFlavor::Slurm;
        assert_eq!(f.map_native_state("PENDING"), JobStatus::Queued);
        assert_eq!(f.map_native_state("RUNNING"), JobStatus::Running);
        assert_eq!(f.map_native_state("SUSPENDED"), JobStatus::Suspended);
        assert_eq!(f.map_native_state("COMPLETED"), JobStatus::Completed);
        assert_eq!(f.map_native_state("CANCELLED"), JobStatus::Cancelled);
        assert_eq!(f.map_native_state("FAILED"), JobStatus::Error);
        assert_eq!(f.map_native_state("SOMETHING_NEW"), JobStatus::Undefined);
        // Job vanished from the queue entirely.
        assert_eq!(f.map_native_state(""), JobStatus::Completed);
    }

    #[test]
    fn lsf_state_table() {
        let f = ClusterFlavor::Lsf;
        assert_eq!(f.map_native_state("PEND"), JobStatus::Queued);
        assert_eq!(f.map_native_state("RUN"), JobStatus::Running);
        assert_eq!(f.map_native_state("USUSP"), JobStatus::Suspended);
        assert_eq!(f.map_native_state("DONE"), JobStatus::Completed);
        assert_eq!(f.map_native_state("EXIT"), JobStatus::Error);
        assert_eq!(f.map_native_state("UNKWN"), JobStatus::Undefined);
    }

    #[test]
    fn condor_state_table_uses_numeric_codes() {
        let f = ClusterFlavor::Condor;
        assert_eq!(f.map_native_state("1"), JobStatus::Queued);
        assert_eq!(f.map_native_state("2"), JobStatus::Running);
        assert_eq!(f.map_native_state("4"), JobStatus::Completed);
        assert_eq!(f.map_native_state("5"), JobStatus::Suspended);
        assert_eq!(f.map_native_state("9"), JobStatus::Undefined);
    }

    #[test]
    fn submit_commands_include_queue_when_set() {
        let cmd = ClusterFlavor::Slurm.submit_command("/work/j1", Some("gpu"));
        assert!(cmd.starts_with("sbatch"));
        assert!(cmd.contains(" -p gpu"));
        let cmd = ClusterFlavor::Sge.submit_command("/work/j1", None);
        assert!(!cmd.contains(" -q "));
    }

    #[test]
    fn cancel_commands_per_flavor() {
        assert_eq!(ClusterFlavor::Slurm.cancel_command("9"), "scancel 9");
        assert_eq!(ClusterFlavor::Torque.cancel_command("9"), "qdel 9");
        assert_eq!(ClusterFlavor::Lsf.cancel_command("9"), "bkill 9");
        assert_eq!(ClusterFlavor::Condor.cancel_command("9"), "condor_rm 9");
    }

    #[test]
    fn condor_stages_a_submit_descriptor() {
        let (name, content) = ClusterFlavor::Condor.extra_staged_file(None).unwrap();
        assert_eq!(name, "job.sub");
        assert!(content.contains("executable = run.sh"));
        assert!(content.contains("queue 1"));
        assert!(ClusterFlavor::Slurm.extra_staged_file(None).is_none());
    }
}
