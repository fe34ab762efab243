//! Line-oriented operator console
//!
//! Each input line is one single-letter command, optionally followed by an
//! argument, e.g. `r 14:30:00.0` or `m -250`.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::{AlignmentSide, Error, Result};
use crate::session::Observatory;

/// Operator commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Set the pier side and arm alignment
    Side(AlignmentSide),
    ToggleMode,
    AlignFromTarget,
    GoToTarget,
    VoidAlignment,
    PreviousAlignment,
    TargetRa(String),
    TargetDec(String),
    /// Opcode without `!` and `;`
    Raw(String),
    OpenMount,
    OpenFocuser,
    MoveFocuser(i32),
    SaveObservation,
    Status,
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parses one console line; a blank line yields `None`
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let (key, arg) = match line.split_once(char::is_whitespace) {
            Some((key, arg)) => (key, arg.trim()),
            None => (line, ""),
        };

        let command = match key {
            "w" => ConsoleCommand::Side(AlignmentSide::West),
            "e" => ConsoleCommand::Side(AlignmentSide::East),
            "t" => ConsoleCommand::ToggleMode,
            "a" => ConsoleCommand::AlignFromTarget,
            "g" => ConsoleCommand::GoToTarget,
            "v" => ConsoleCommand::VoidAlignment,
            "b" => ConsoleCommand::PreviousAlignment,
            "r" => ConsoleCommand::TargetRa(required(key, arg)?),
            "d" => ConsoleCommand::TargetDec(required(key, arg)?),
            "c" => ConsoleCommand::Raw(required(key, arg)?),
            "o" => ConsoleCommand::OpenMount,
            "f" => ConsoleCommand::OpenFocuser,
            "m" => {
                let steps = required(key, arg)?;
                let steps = steps
                    .parse::<i32>()
                    .map_err(|_| Error::command(format!("Not a step count: {}", steps)))?;
                ConsoleCommand::MoveFocuser(steps)
            }
            "p" => ConsoleCommand::SaveObservation,
            "s" => ConsoleCommand::Status,
            "h" | "?" => ConsoleCommand::Help,
            "q" => ConsoleCommand::Quit,
            other => return Err(Error::command(format!("Unknown command: {}", other))),
        };

        Ok(Some(command))
    }
}

fn required(key: &str, arg: &str) -> Result<String> {
    if arg.is_empty() {
        Err(Error::command(format!("'{}' needs an argument", key)))
    } else {
        Ok(arg.to_string())
    }
}

const HELP: &str = "w/e side+align, t toggle mode, a align, g goto, v void, b previous, \
r <ra>, d <dec>, c <opcode>, o open mount, f open focuser, m <steps>, p save, s status, q quit";

/// Reads commands and runs them against the shared devices
pub struct Console {
    observatory: Observatory,
}

impl Console {
    /// Creates a new console over the shared devices
    pub fn new(observatory: Observatory) -> Self {
        Console { observatory }
    }

    /// Runs until `q`, end of input, or shutdown. `q` cancels `shutdown`.
    pub async fn run<R>(self, input: R, shutdown: CancellationToken)
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("console input closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "console read failed");
                    break;
                }
            };

            match ConsoleCommand::parse(&line) {
                Ok(Some(ConsoleCommand::Quit)) => {
                    self.observatory.sink.message("Exiting.");
                    shutdown.cancel();
                    break;
                }
                Ok(Some(command)) => {
                    if let Err(e) = self.execute(command).await {
                        self.observatory.sink.message(&e.to_string());
                    }
                }
                Ok(None) => {}
                Err(e) => self.observatory.sink.message(&e.to_string()),
            }
        }
    }

    /// Runs one parsed command
    pub async fn execute(&self, command: ConsoleCommand) -> Result<()> {
        let obs = &self.observatory;
        match command {
            ConsoleCommand::Side(side) => obs.choose_alignment_side(side).await,
            ConsoleCommand::ToggleMode => {
                let mode = obs.mode.toggle();
                obs.sink.message(&format!("Stellarium mode: {}.", mode));
                Ok(())
            }
            ConsoleCommand::AlignFromTarget => obs.mount.with(|m| m.align_from_target()).await.map(drop),
            ConsoleCommand::GoToTarget => obs.mount.with(|m| m.go_to_target()).await.map(drop),
            ConsoleCommand::VoidAlignment => obs.mount.with(|m| m.void_alignment()).await.map(drop),
            ConsoleCommand::PreviousAlignment => obs
                .mount
                .with(|m| m.return_to_previous_alignment())
                .await
                .map(drop),
            ConsoleCommand::TargetRa(ra) => obs.mount.with(move |m| m.set_target_ra(&ra)).await.map(drop),
            ConsoleCommand::TargetDec(dec) => obs.mount.with(move |m| m.set_target_dec(&dec)).await.map(drop),
            ConsoleCommand::Raw(opcode) => obs.mount.with(move |m| m.send_raw(&opcode)).await.map(drop),
            ConsoleCommand::OpenMount => obs.open_mount().await,
            ConsoleCommand::OpenFocuser => obs.open_focuser().await,
            ConsoleCommand::MoveFocuser(steps) => obs.focuser.with(move |f| f.move_by(steps)).await,
            ConsoleCommand::SaveObservation => obs.save_observation().await,
            ConsoleCommand::Status => self.status().await,
            ConsoleCommand::Help => {
                obs.sink.message(HELP);
                Ok(())
            }
            ConsoleCommand::Quit => Ok(()),
        }
    }

    async fn status(&self) -> Result<()> {
        let obs = &self.observatory;
        let mount = obs.mount.with(|m| Ok(m.fields().clone())).await?;
        let focuser = obs.focuser.with(|f| Ok(f.fields().clone())).await?;

        for (field, value) in mount.iter() {
            obs.sink.message(&format!("{}: {}", field.label(), value));
        }
        for (field, value) in focuser.iter() {
            obs.sink.message(&format!("{}: {}", field.label(), value));
        }
        obs.sink.message(&format!("Stellarium mode: {}.", obs.mode.get()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AlignmentMode;
    use crate::protocol::{build_frame, ACK};
    use crate::session::testing::harness;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ConsoleCommand::parse("").unwrap(), None);
        assert_eq!(ConsoleCommand::parse("  t ").unwrap(), Some(ConsoleCommand::ToggleMode));
        assert_eq!(
            ConsoleCommand::parse("e").unwrap(),
            Some(ConsoleCommand::Side(AlignmentSide::East))
        );
        assert_eq!(
            ConsoleCommand::parse("r 14:30:00.0").unwrap(),
            Some(ConsoleCommand::TargetRa("14:30:00.0".to_string()))
        );
        assert_eq!(
            ConsoleCommand::parse("c   AGas ").unwrap(),
            Some(ConsoleCommand::Raw("AGas".to_string()))
        );
        assert_eq!(
            ConsoleCommand::parse("m -250").unwrap(),
            Some(ConsoleCommand::MoveFocuser(-250))
        );
        assert_eq!(ConsoleCommand::parse("q").unwrap(), Some(ConsoleCommand::Quit));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(ConsoleCommand::parse("x").is_err());
        assert!(ConsoleCommand::parse("r").is_err());
        assert!(ConsoleCommand::parse("m ten").is_err());
    }

    #[tokio::test]
    async fn test_execute_mount_commands() {
        let h = harness();
        h.mount.set_responder(|_| vec![ACK]);
        let console = Console::new(h.observatory.clone());

        console.execute(ConsoleCommand::TargetRa("14:30:00.0".into())).await.unwrap();
        console.execute(ConsoleCommand::TargetDec("-10:00:00.0".into())).await.unwrap();
        console.execute(ConsoleCommand::GoToTarget).await.unwrap();
        console.execute(ConsoleCommand::Raw("AVoi".into())).await.unwrap();

        assert_eq!(
            h.mount.written_strings(),
            vec!["!CStr14:30:00.0;", "!CStd-10:00:00.0;", "!GTrd;", "!AVoi;"]
        );
    }

    #[tokio::test]
    async fn test_execute_focuser_move() {
        let h = harness();
        let console = Console::new(h.observatory.clone());

        console.execute(ConsoleCommand::MoveFocuser(-45)).await.unwrap();
        assert_eq!(h.focuser.written(), vec![build_frame("FI000045").unwrap()]);
    }

    #[tokio::test]
    async fn test_run_until_quit() {
        let h = harness();
        let shutdown = CancellationToken::new();
        let console = Console::new(h.observatory.clone());

        console.run(&b"t\nbogus\ns\nq\nt\n"[..], shutdown.clone()).await;

        assert!(shutdown.is_cancelled());
        // the second toggle after quit never ran
        assert_eq!(h.observatory.mode.get(), AlignmentMode::Goto);
        assert!(h.sink.has_message("Unknown command: bogus"));
        assert!(h.sink.has_message("Current right ascension: N/A"));
        assert!(h.sink.has_message("Stellarium mode: GoTo next coordinates."));
    }

    #[tokio::test]
    async fn test_end_of_input_does_not_shut_down() {
        let h = harness();
        let shutdown = CancellationToken::new();
        let input = tokio_test::io::Builder::new().read(b"w\n").build();
        h.mount.queue_reply(&[ACK]);

        Console::new(h.observatory.clone())
            .run(tokio::io::BufReader::new(input), shutdown.clone())
            .await;

        assert!(!shutdown.is_cancelled());
        assert_eq!(h.mount.written_strings(), vec!["!ASasWest;"]);
    }
}
