//! Jobs: caller-defined command sequences plus lifecycle callbacks.

use std::collections::VecDeque;

use crossbeam_channel::{Receiver, Sender};

use crate::protocol::{Command, ModeSet};

/// Callbacks fired as a job moves through its lifecycle.
///
/// All callbacks run on the scheduler's worker thread; keep them short.
/// `on_aborted` can only fire before `on_start`; `on_error` only after
/// `on_start` and instead of `on_completed`.
pub trait JobObserver: Send {
    /// The job was dequeued and is about to execute.
    fn on_start(&mut self) {}

    /// One command finished; `lines` is its response block.
    fn on_result(&mut self, _lines: &[String], _command: &Command) {}

    /// Every command ran and delivered its result.
    fn on_completed(&mut self) {}

    /// The job was purged from the queue before it started.
    fn on_aborted(&mut self) {}

    /// An I/O or mode error interrupted the job; remaining commands are
    /// dropped.
    fn on_error(&mut self) {}
}

/// The silent observer.
impl JobObserver for () {}

/// A single-use sequence of CLI commands executed as one scheduling unit.
///
/// Commands run strictly in order on one connection, with mode switches
/// inserted by the scheduler as needed. Enqueueing consumes the job, so a
/// job cannot gain commands once execution may have begun.
pub struct Job {
    commands: VecDeque<Command>,
    observer: Box<dyn JobObserver>,
}

impl Job {
    /// Empty job; append commands with [`push_command`](Self::push_command).
    pub fn new(observer: impl JobObserver + 'static) -> Job {
        Job {
            commands: VecDeque::new(),
            observer: Box::new(observer),
        }
    }

    /// Job consisting of exactly one command.
    pub fn single(
        text: impl Into<String>,
        modes: ModeSet,
        observer: impl JobObserver + 'static,
    ) -> Job {
        let mut job = Job::new(observer);
        job.push_command(Command::new(text, modes));
        job
    }

    /// Property job: the setters run in order, the getter always runs last.
    /// With no setters the getter runs first (and only).
    pub fn property(
        setters: Vec<Command>,
        getter: Command,
        observer: impl JobObserver + 'static,
    ) -> Job {
        let mut job = Job::new(observer);
        for setter in setters {
            job.push_command(setter);
        }
        job.push_command(getter);
        job
    }

    /// Append a command to the end of the sequence.
    pub fn push_command(&mut self, command: Command) {
        self.commands.push_back(command);
    }

    pub fn has_more_commands(&self) -> bool {
        !self.commands.is_empty()
    }

    pub(crate) fn next_command(&mut self) -> Option<Command> {
        self.commands.pop_front()
    }

    pub(crate) fn observer_mut(&mut self) -> &mut dyn JobObserver {
        &mut *self.observer
    }
}

/// Lifecycle events as delivered by a [`ChannelObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Started,
    /// Response block for one command.
    Result {
        command: String,
        lines: Vec<String>,
    },
    Completed,
    Aborted,
    Failed,
}

/// Observer that forwards every callback into a channel.
///
/// When the scheduler drops a job without firing a terminal callback (a
/// failed connection attempt does this), the sender goes with it and the
/// receiver disconnects. A disconnect without a terminal event therefore
/// means the job was dropped.
pub struct ChannelObserver {
    tx: Sender<JobEvent>,
}

impl ChannelObserver {
    pub fn new() -> (ChannelObserver, Receiver<JobEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (ChannelObserver { tx }, rx)
    }
}

impl JobObserver for ChannelObserver {
    fn on_start(&mut self) {
        let _ = self.tx.send(JobEvent::Started);
    }

    fn on_result(&mut self, lines: &[String], command: &Command) {
        let _ = self.tx.send(JobEvent::Result {
            command: command.text().to_string(),
            lines: lines.to_vec(),
        });
    }

    fn on_completed(&mut self) {
        let _ = self.tx.send(JobEvent::Completed);
    }

    fn on_aborted(&mut self) {
        let _ = self.tx.send(JobEvent::Aborted);
    }

    fn on_error(&mut self) {
        let _ = self.tx.send(JobEvent::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Mode;

    fn texts(mut job: Job) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(cmd) = job.next_command() {
            out.push(cmd.text().to_string());
        }
        out
    }

    #[test]
    fn single_job_has_one_command() {
        let job = Job::single("shutdown", ModeSet::only(Mode::Privileged), ());
        assert!(job.has_more_commands());
        assert_eq!(texts(job), vec!["shutdown"]);
    }

    #[test]
    fn property_job_runs_setters_then_getter() {
        let job = Job::property(
            vec![
                Command::with_mode("set interval 5", Mode::Config),
                Command::with_mode("set ttl 64", Mode::Config),
            ],
            Command::with_mode("get interval", Mode::Privileged),
            (),
        );
        assert_eq!(texts(job), vec!["set interval 5", "set ttl 64", "get interval"]);
    }

    #[test]
    fn property_job_without_setters_runs_getter_first() {
        let job = Job::property(
            Vec::new(),
            Command::with_mode("get interval", Mode::Privileged),
            (),
        );
        assert_eq!(texts(job), vec!["get interval"]);
    }

    #[test]
    fn commands_drain_in_insertion_order() {
        let mut job = Job::new(());
        assert!(!job.has_more_commands());
        job.push_command(Command::with_mode("first", Mode::Default));
        job.push_command(Command::with_mode("second", Mode::Default));
        assert_eq!(texts(job), vec!["first", "second"]);
    }

    #[test]
    fn channel_observer_forwards_events() {
        let (mut observer, rx) = ChannelObserver::new();
        let command = Command::with_mode("show info", Mode::Default);

        observer.on_start();
        observer.on_result(&["a".to_string(), "b".to_string()], &command);
        observer.on_completed();

        assert_eq!(rx.recv().unwrap(), JobEvent::Started);
        assert_eq!(
            rx.recv().unwrap(),
            JobEvent::Result {
                command: "show info".into(),
                lines: vec!["a".into(), "b".into()],
            }
        );
        assert_eq!(rx.recv().unwrap(), JobEvent::Completed);
    }

    #[test]
    fn dropping_the_job_disconnects_the_receiver() {
        let (observer, rx) = ChannelObserver::new();
        let job = Job::single("noop", ModeSet::only(Mode::Default), observer);
        drop(job);
        assert!(rx.recv().is_err());
    }
}
