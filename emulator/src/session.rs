use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use capture_core::buffer::SampleBuffer;
use capture_core::channel::{CaptureState, SelectionTrigger};
use capture_core::commands::{Command, HELP_TEXT, parse_command};
use capture_core::controller::CaptureController;
use capture_core::sampler::Sampler;
use capture_core::storage::{
    ExclusiveAccess, FencePolicy, MemoryStorage, SaveReport, StorageConfig, StorageManager,
};

use crate::host::{HostClock, WaveformAdc};

/// Size of the emulated internal flash.
pub const FLASH_CAPACITY: usize = 512 * 1024;

pub type HostFlash = MemoryStorage<2048, 8>;

type HostController<'a> =
    CaptureController<'a, WaveformAdc, HostClock, HostFlash, ExclusiveAccess>;

pub struct Session<'a> {
    controller: HostController<'a>,
    transcript: Option<TranscriptLogger>,
    started_at: Instant,
    last_acquisition: Option<SampleBuffer>,
}

impl<'a> Session<'a> {
    pub fn new(state: &'a CaptureState) -> Self {
        let sampler = Sampler::new(state, WaveformAdc::new(), HostClock);
        let config = StorageConfig {
            policy: FencePolicy::Report,
            ..StorageConfig::default()
        };
        let storage = StorageManager::new(HostFlash::new(FLASH_CAPACITY), ExclusiveAccess, config);

        Self {
            controller: CaptureController::new(sampler, storage),
            transcript: None,
            started_at: Instant::now(),
            last_acquisition: None,
        }
    }

    /// Mirrors every exchange into `path`.
    pub fn with_transcript(mut self, path: &Path) -> io::Result<Self> {
        self.transcript = Some(TranscriptLogger::create(path)?);
        Ok(self)
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.started_at.elapsed();
        self.log(elapsed, TranscriptRole::Host, trimmed)?;

        let lines = match parse_command(trimmed) {
            Ok(command) => self.execute(command),
            Err(err) => vec![format!("ERR syntax {err}")],
        };

        for line in &lines {
            self.log(elapsed, TranscriptRole::Emulator, line)?;
        }
        Ok(lines)
    }

    fn execute(&mut self, command: Command) -> Vec<String> {
        match command {
            Command::Select(channel) => {
                let selection = self.controller.select(SelectionTrigger::for_channel(channel));
                vec![format!(
                    "OK select {} seq={}",
                    selection.channel, selection.sequence
                )]
            }
            Command::Acquire(duration) => self.acquire(duration),
            Command::Capture(duration) => self.capture(duration),
            Command::Save => self.save(),
            Command::Load(count) => {
                let result = match count {
                    Some(count) => self.controller.load(count),
                    None => self.controller.load_last(),
                };
                match result {
                    Ok(buffer) => vec![
                        format!("OK load samples={}", buffer.len()),
                        format_samples(&buffer),
                    ],
                    Err(err) => vec![format!("ERR load {err}")],
                }
            }
            Command::Status => self.status(),
            Command::Help => HELP_TEXT.lines().map(str::to_string).collect(),
        }
    }

    fn acquire(&mut self, duration: Duration) -> Vec<String> {
        let channel = self.controller.state().active_channel();
        let budget = self.controller.sampler().config().budget_for(duration);

        match self.controller.acquire(duration) {
            Ok(buffer) => {
                let lines = vec![
                    format!(
                        "OK acquire {channel} samples={} budget={budget}",
                        buffer.len()
                    ),
                    format_samples(&buffer),
                ];
                self.last_acquisition = Some(buffer);
                lines
            }
            Err(err) => vec![format!("ERR acquire {err}")],
        }
    }

    fn capture(&mut self, duration: Duration) -> Vec<String> {
        match self.controller.capture_and_store(duration) {
            Ok(outcome) => {
                let lines = vec![
                    format!(
                        "OK capture samples={} {}",
                        outcome.captured.len(),
                        describe_save(&outcome.saved)
                    ),
                    format_samples(&outcome.readback),
                ];
                self.last_acquisition = Some(outcome.captured);
                lines
            }
            Err(err) => vec![format!("ERR capture {err}")],
        }
    }

    fn save(&mut self) -> Vec<String> {
        let Some(buffer) = self.last_acquisition.as_ref() else {
            return vec!["ERR save nothing acquired".to_string()];
        };
        match self.controller.save(buffer) {
            Ok(report) => vec![format!("OK save {}", describe_save(&report))],
            Err(err) => vec![format!("ERR save {err}")],
        }
    }

    fn status(&self) -> Vec<String> {
        let status = self.controller.status();
        let last_saved = status
            .last_saved
            .map_or_else(|| "none".to_string(), |n| n.to_string());
        vec![
            format!(
                "channel={} phase={:?} acquiring={} selections={} dropped={}",
                status.channel,
                status.phase,
                status.acquiring,
                status.selections,
                status.dropped_selections
            ),
            format!(
                "region={:#x}..{:#x} capacity={} last-saved={last_saved}",
                status.region.offset,
                status.region.end(),
                status.region.sample_capacity(),
            ),
        ]
    }

    fn log(&mut self, elapsed: Duration, role: TranscriptRole, line: &str) -> io::Result<()> {
        match self.transcript.as_mut() {
            Some(transcript) => transcript.append_line(elapsed, role, line),
            None => Ok(()),
        }
    }
}

fn describe_save(report: &SaveReport) -> String {
    format!(
        "stored={} erased={:#x}+{} programmed={}",
        report.samples, report.erased.offset, report.erased.len, report.programmed
    )
}

fn format_samples(buffer: &SampleBuffer) -> String {
    buffer
        .iter()
        .map(|value| format!("{value:.5}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU<",
        }
    }
}

struct TranscriptLogger {
    writer: BufWriter<File>,
}

impl TranscriptLogger {
    fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "# ADC capture emulator transcript")?;
        writeln!(writer, "# Timestamps are milliseconds since session start")?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(Self { writer })
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capture_core::channel::DEFAULT_CHANNEL;

    fn respond(session: &mut Session<'_>, line: &str) -> Vec<String> {
        session.handle_command(line).expect("in-memory session")
    }

    fn sample_count(line: &str) -> usize {
        line.split_whitespace()
            .find_map(|field| field.strip_prefix("samples="))
            .and_then(|value| value.parse().ok())
            .expect("samples field")
    }

    #[test]
    fn acquire_reports_at_most_the_budget() {
        let state = CaptureState::new(DEFAULT_CHANNEL);
        let mut session = Session::new(&state);

        let lines = respond(&mut session, "acquire 800us");
        assert!(lines[0].starts_with("OK acquire ADC0"), "{lines:?}");
        assert!(lines[0].ends_with("budget=10"));
        let count = sample_count(&lines[0]);
        assert!((1..=10).contains(&count), "{count}");
        assert_eq!(lines[1].split_whitespace().count(), count);
        assert!(!state.is_acquiring());
    }

    #[test]
    fn save_requires_an_acquisition() {
        let state = CaptureState::new(DEFAULT_CHANNEL);
        let mut session = Session::new(&state);

        assert_eq!(respond(&mut session, "save"), ["ERR save nothing acquired"]);

        respond(&mut session, "acquire 400");
        let saved = respond(&mut session, "save");
        assert!(saved[0].starts_with("OK save stored="), "{saved:?}");
    }

    #[test]
    fn load_without_count_reads_back_last_save() {
        let state = CaptureState::new(DEFAULT_CHANNEL);
        let mut session = Session::new(&state);

        respond(&mut session, "select 2");
        let acquired = respond(&mut session, "acquire 240us");
        respond(&mut session, "save");
        let loaded = respond(&mut session, "load");

        assert_eq!(sample_count(&loaded[0]), sample_count(&acquired[0]));
        assert_eq!(loaded[1], acquired[1]);
        // ADC2 sits at mid-scale
        assert!(loaded[1].split_whitespace().all(|value| value == "1.65000"));
    }

    #[test]
    fn capture_reads_back_what_it_stored() {
        let state = CaptureState::new(DEFAULT_CHANNEL);
        let mut session = Session::new(&state);

        let lines = respond(&mut session, "capture 800us");
        assert!(lines[0].starts_with("OK capture"), "{lines:?}");
        assert!(lines[0].contains("erased=0x76000+2048"));
        assert_eq!(lines[1].split_whitespace().count(), sample_count(&lines[0]));
    }

    #[test]
    fn select_is_reflected_in_status() {
        let state = CaptureState::new(DEFAULT_CHANNEL);
        let mut session = Session::new(&state);

        assert_eq!(respond(&mut session, "select 1"), ["OK select ADC1 seq=1"]);
        let status = respond(&mut session, "status");
        assert_eq!(
            status[0],
            "channel=ADC1 phase=Idle acquiring=false selections=1 dropped=0"
        );
        assert!(status[1].ends_with("last-saved=none"));
    }

    #[test]
    fn syntax_errors_are_reported() {
        let state = CaptureState::new(DEFAULT_CHANNEL);
        let mut session = Session::new(&state);

        let lines = respond(&mut session, "select 7");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ERR syntax"));
        assert!(respond(&mut session, "   ").is_empty());
    }
}
