//! Scripted doubles for [`CommandRunner`] and [`HttpProbe`]
//!
//! Unmatched commands succeed with empty output. Rules added later take
//! precedence over earlier ones, so a test can install broad defaults and
//! then override a single command.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::Result;
use crate::exec::{CmdOutput, CommandRunner, HttpProbe, Invocation};

struct Rule {
    program: String,
    fragments: Vec<String>,
    responses: VecDeque<CmdOutput>,
}

impl Rule {
    fn matches(&self, invocation: &Invocation) -> bool {
        let fragments: Vec<&str> = self.fragments.iter().map(String::as_str).collect();
        invocation.matches(&self.program, &fragments)
    }

    fn next_response(&mut self) -> CmdOutput {
        if self.responses.len() > 1 {
            self.responses.pop_front().unwrap_or_default()
        } else {
            self.responses.front().cloned().unwrap_or_default()
        }
    }
}

/// Command runner that records every invocation and answers from rules
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
}

/// Pending rule returned by [`ScriptedRunner::on`]
pub struct RuleBuilder<'a> {
    runner: &'a ScriptedRunner,
    program: String,
    fragments: Vec<String>,
}

impl RuleBuilder<'_> {
    /// Always answer with `output`
    pub fn respond(self, output: CmdOutput) {
        self.respond_seq(vec![output]);
    }

    /// Answer with each output in turn, repeating the last one
    pub fn respond_seq(self, outputs: Vec<CmdOutput>) {
        let rule = Rule {
            program: self.program,
            fragments: self.fragments,
            responses: outputs.into(),
        };
        self.runner.rules.lock().unwrap().push(rule);
    }
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a rule for `program` whose args contain `fragments` in order
    pub fn on(&self, program: &str, fragments: &[&str]) -> RuleBuilder<'_> {
        RuleBuilder {
            runner: self,
            program: program.to_string(),
            fragments: fragments.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded invocations matching `program` and `fragments`
    pub fn count(&self, program: &str, fragments: &[&str]) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|inv| inv.matches(program, fragments))
            .count()
    }

    pub fn ran(&self, program: &str, fragments: &[&str]) -> bool {
        self.count(program, fragments) > 0
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CmdOutput> {
        self.calls.lock().unwrap().push(invocation.clone());
        let mut rules = self.rules.lock().unwrap();
        let output = rules
            .iter_mut()
            .rev()
            .find(|rule| rule.matches(invocation))
            .map_or_else(|| CmdOutput::ok(""), Rule::next_response);
        Ok(output)
    }
}

/// HTTP probe answering from a fixed sequence of status codes (last one repeats)
pub struct StaticProbe {
    statuses: Mutex<VecDeque<u16>>,
    requests: Mutex<Vec<String>>,
}

impl StaticProbe {
    pub fn new(statuses: Vec<u16>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpProbe for StaticProbe {
    async fn status(&self, url: &str) -> Result<u16> {
        self.requests.lock().unwrap().push(url.to_string());
        let mut statuses = self.statuses.lock().unwrap();
        let status = if statuses.len() > 1 {
            statuses.pop_front().unwrap_or(200)
        } else {
            statuses.front().copied().unwrap_or(200)
        };
        Ok(status)
    }
}
