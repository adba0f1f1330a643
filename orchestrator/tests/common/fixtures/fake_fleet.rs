//! Scripted stand-in for the hosts of a cluster
//!
//! Commands are answered from rules matched on host and command fragment; the
//! most recently added matching rule wins. Guest VMs are modelled per
//! hypervisor so `virsh shutdown`/`virsh start` change what `virsh list`
//! reports. Every invocation is recorded for later assertions.

use async_trait::async_trait;
use orchestrator::errors::RemoteError;
use orchestrator::remote::{CommandOutput, RemoteExecutor};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

pub fn out(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn exit(code: i32) -> CommandOutput {
    CommandOutput {
        exit_code: code,
        stdout: String::new(),
        stderr: if code == 0 {
            String::new()
        } else {
            format!("exited with {}", code)
        },
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Output(CommandOutput),
    /// Served in order; the last entry repeats
    Sequence(Vec<CommandOutput>),
    Unreachable,
}

struct Rule {
    host: Option<String>,
    fragment: String,
    reply: Reply,
    served: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub host: String,
    pub command: String,
}

pub struct FakeFleet {
    rules: Mutex<Vec<Rule>>,
    guests: Mutex<BTreeMap<String, BTreeSet<String>>>,
    calls: Mutex<Vec<Invocation>>,
}

const CELL_SERVICES: &str = "\
         cellsrvStatus:          running
         msStatus:               running
         rsStatus:               running
";

const DBSERVER_SERVICES: &str = "\
         msStatus:               running
         rsStatus:               running
";

const CRS_ONLINE: &str = "\
CRS-4638: Oracle High Availability Services is online
CRS-4537: Cluster Ready Services is online
CRS-4529: Cluster Synchronization Services is online
CRS-4533: Event Manager is online
";

impl FakeFleet {
    /// A healthy fleet: no console logs yet, no patchmgr session running,
    /// services up, grid disks redundant and every patchmgr run exiting 0
    pub fn new() -> Self {
        let fleet = Self {
            rules: Mutex::new(Vec::new()),
            guests: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
        };
        fleet
            .on("test -f", exit(1))
            .on("pgrep -f", exit(1))
            .on("Exit status", out("2024-05-01 10:42:17 Exit status:0"))
            .on("imageinfo -status", out("success"))
            .on("list cell detail", out(CELL_SERVICES))
            .on("list dbserver detail", out(DBSERVER_SERVICES))
            .on("crsctl check crs", out(CRS_ONLINE))
            .on(
                "asmmodestatus'",
                out("DATAC1_CD_00_cel   ONLINE\nRECOC1_CD_00_cel   ONLINE\n"),
            )
            .on("asmdeactivationoutcome", out("DATAC1_CD_00_cel\t ONLINE\t Yes\n"));
        fleet
    }

    fn push(&self, host: Option<&str>, fragment: &str, reply: Reply) {
        self.rules.lock().unwrap().push(Rule {
            host: host.map(str::to_string),
            fragment: fragment.to_string(),
            reply,
            served: 0,
        });
    }

    /// Answer any host's command containing `fragment`
    pub fn on(&self, fragment: &str, output: CommandOutput) -> &Self {
        self.push(None, fragment, Reply::Output(output));
        self
    }

    pub fn on_host(&self, host: &str, fragment: &str, output: CommandOutput) -> &Self {
        self.push(Some(host), fragment, Reply::Output(output));
        self
    }

    /// Successive answers for one host, e.g. the image version before and
    /// after patching
    pub fn on_host_seq(&self, host: &str, fragment: &str, outputs: Vec<CommandOutput>) -> &Self {
        self.push(Some(host), fragment, Reply::Sequence(outputs));
        self
    }

    /// Image version reported by `imageinfo` on `host`, before and after
    pub fn image_versions(&self, host: &str, before: &str, after: &str) -> &Self {
        self.on_host_seq(host, "imageinfo -ver", vec![out(before), out(after)])
    }

    pub fn image_version(&self, host: &str, version: &str) -> &Self {
        self.on_host(host, "imageinfo -ver", out(version))
    }

    /// Every command sent to `host` fails to connect
    pub fn unreachable(&self, host: &str) -> &Self {
        self.push(Some(host), "", Reply::Unreachable);
        self
    }

    /// Commands on `host` containing `fragment` fail to connect
    pub fn unreachable_for(&self, host: &str, fragment: &str) -> &Self {
        self.push(Some(host), fragment, Reply::Unreachable);
        self
    }

    pub fn with_guests(&self, hypervisor: &str, guests: &[&str]) -> &Self {
        self.guests.lock().unwrap().insert(
            hypervisor.to_string(),
            guests.iter().map(|g| g.to_string()).collect(),
        );
        self
    }

    pub fn running_guests(&self, hypervisor: &str) -> Vec<String> {
        self.guests
            .lock()
            .unwrap()
            .get(hypervisor)
            .map(|g| g.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, fragment: &str) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|c| c.command.contains(fragment))
            .collect()
    }

    pub fn count(&self, fragment: &str) -> usize {
        self.calls_matching(fragment).len()
    }

    /// patchmgr invocations other than cleanup
    pub fn launches(&self) -> Vec<Invocation> {
        self.calls_matching("./patchmgr")
            .into_iter()
            .filter(|c| !c.command.contains("--cleanup"))
            .collect()
    }

    fn scripted(&self, host: &str, command: &str) -> Option<Reply> {
        let mut rules = self.rules.lock().unwrap();
        let rule = rules.iter_mut().rev().find(|r| {
            r.host.as_deref().map_or(true, |h| h == host) && command.contains(&r.fragment)
        })?;
        let reply = match &rule.reply {
            Reply::Sequence(outputs) => {
                let index = rule.served.min(outputs.len().saturating_sub(1));
                Reply::Output(outputs[index].clone())
            }
            other => other.clone(),
        };
        rule.served += 1;
        Some(reply)
    }

    fn virsh(&self, host: &str, command: &str) -> Option<CommandOutput> {
        let mut guests = self.guests.lock().unwrap();
        let running = guests.entry(host.to_string()).or_default();
        if command.contains("virsh list") {
            let listing: Vec<&str> = running.iter().map(String::as_str).collect();
            return Some(out(&listing.join("\n")));
        }
        if let Some(guest) = command.strip_prefix("virsh shutdown ") {
            running.remove(guest.trim());
            return Some(exit(0));
        }
        if let Some(guest) = command.strip_prefix("virsh start ") {
            running.insert(guest.trim().to_string());
            return Some(exit(0));
        }
        None
    }
}

impl Default for FakeFleet {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteExecutor for FakeFleet {
    async fn run(
        &self,
        host: &str,
        command: &str,
        _timeout: Duration,
    ) -> Result<CommandOutput, RemoteError> {
        self.calls.lock().unwrap().push(Invocation {
            host: host.to_string(),
            command: command.to_string(),
        });

        match self.scripted(host, command) {
            Some(Reply::Output(output)) => Ok(output),
            Some(Reply::Unreachable) => Err(RemoteError::ConnectionFailed {
                host: host.to_string(),
                reason: "No route to host".to_string(),
            }),
            Some(Reply::Sequence(_)) => unreachable!("sequences resolve to one output"),
            None => Ok(self.virsh(host, command).unwrap_or_else(|| exit(0))),
        }
    }
}
