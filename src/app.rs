//! Demo shell around the dispatcher: loads a contact list, wires the
//! scripted line and amplitude source to the controller, and prints every
//! notice a run produces. Also home to the temp-file debug log the rest of
//! the crate writes through.

use std::{
    env, fs,
    io::Write,
    path::PathBuf,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::config::AppConfig;
use crate::contacts::{Contact, ContactRegistry, FixedSelection};
use crate::sampler::AmplitudeSource;
use crate::sequence::{AdvanceReason, SequenceController, SequenceNotice};
use crate::sim::{CallBehavior, SimAmplitudeSource, SimLine, DEFAULT_VOICE_AMPLITUDE};
use crate::telephony::CallLine;
use anyhow::{bail, Context, Result};

/// Path to the temp log file we rotate between runs.
pub fn log_file_path() -> PathBuf {
    env::temp_dir().join("wristcall.log")
}

/// Write debug messages to a temp file so runs can be audited afterwards.
pub fn log_debug(msg: &str) {
    use std::fs::OpenOptions;

    let log_path = log_file_path();
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(log_path) {
        let _ = writeln!(file, "[{timestamp}] {msg}");
    }
}

/// Remove the log file if it grows past 5 MB between runs.
pub fn init_debug_log_file() {
    let log_path = log_file_path();
    if let Ok(metadata) = fs::metadata(&log_path) {
        const MAX_BYTES: u64 = 5 * 1024 * 1024;
        if metadata.len() > MAX_BYTES {
            let _ = fs::remove_file(&log_path);
        }
    }
}

/// Built-in contact list used when no `--contacts` file is given. The last
/// slot is the generic emergency number the auto-advance skips.
pub fn demo_contacts() -> Vec<Contact> {
    vec![
        Contact::new("Ana", "5550101"),
        Contact::new("Marco", "5550102"),
        Contact::new("Giulia", "5550103"),
        Contact::marker("Emergency", "112"),
    ]
}

/// Load the registry from the configured file, or fall back to the demo set.
pub fn load_registry(config: &AppConfig) -> Result<ContactRegistry> {
    match &config.contacts {
        Some(path) => ContactRegistry::from_json_file(path),
        None => ContactRegistry::new(demo_contacts()),
    }
}

/// Render the contact list the way `--list-contacts` prints it.
pub fn render_contact_list(registry: &ContactRegistry) -> String {
    let mut output = String::from("Contact list:\n");
    for (index, contact) in registry.contacts().iter().enumerate() {
        if contact.marker {
            output.push_str(&format!(
                "  {index}. {} ({}) [marker]\n",
                contact.name, contact.phone_number
            ));
        } else {
            output.push_str(&format!(
                "  {index}. {} ({})\n",
                contact.name, contact.phone_number
            ));
        }
    }
    output
}

/// Map `--scenario` entries onto the scripted line. With no scenario every
/// contact answers with a voice, so the default invocation succeeds on the
/// first dial; contacts past the end of the scenario ring unanswered.
fn apply_scenario(line: &SimLine, registry: &ContactRegistry, config: &AppConfig) -> Result<()> {
    if config.scenario.is_empty() {
        line.set_default_behavior(CallBehavior::AnswerVoice {
            amplitude: DEFAULT_VOICE_AMPLITUDE,
        });
        return Ok(());
    }
    if config.scenario.len() > registry.len() {
        bail!(
            "--scenario lists {} behaviors but only {} contacts are loaded",
            config.scenario.len(),
            registry.len()
        );
    }
    for (index, entry) in config.scenario.iter().enumerate() {
        let behavior = CallBehavior::parse(entry)
            .with_context(|| format!("--scenario entry {index} is invalid"))?;
        line.set_behavior(&registry.get(index).phone_number, behavior);
    }
    Ok(())
}

fn amplitude_source(
    config: &AppConfig,
    sim: &Arc<SimAmplitudeSource>,
) -> Result<Option<Arc<dyn AmplitudeSource>>> {
    if config.assume_voicemail {
        return Ok(None);
    }
    #[cfg(feature = "mic")]
    if config.use_mic {
        let mic = crate::mic::MicAmplitudeSource::open(config.input_device.as_deref())?;
        println!("Voice check using input device: {}", mic.device_name());
        return Ok(Some(Arc::new(mic)));
    }
    Ok(Some(Arc::clone(sim) as Arc<dyn AmplitudeSource>))
}

fn print_notice(registry: &ContactRegistry, notice: &SequenceNotice, log_events: bool) {
    match notice {
        SequenceNotice::Started { index } => {
            let contact = registry.get(*index);
            println!("Calling {} ({})...", contact.name, contact.phone_number);
            if log_events {
                println!("notice|started|index={index}");
            }
        }
        SequenceNotice::Advanced { from, to, reason } => {
            let previous = registry.get(*from);
            let next = registry.get(*to);
            match reason {
                AdvanceReason::NoAnswer => {
                    println!(
                        "No answer from {}; calling {} ({})...",
                        previous.name, next.name, next.phone_number
                    );
                }
                AdvanceReason::VoicemailAssumed => {
                    println!(
                        "Voicemail assumed for {}; calling {} ({})...",
                        previous.name, next.name, next.phone_number
                    );
                }
            }
            if log_events {
                println!("notice|advanced|from={from}|to={to}|reason={}", reason.label());
            }
        }
        SequenceNotice::Succeeded { index } => {
            println!("{} answered; sequence complete.", registry.get(*index).name);
            if log_events {
                println!("notice|succeeded|index={index}");
            }
        }
        SequenceNotice::Cancelled => {
            println!("Calling sequence stopped.");
            if log_events {
                println!("notice|cancelled");
            }
        }
        SequenceNotice::Failed { index, error } => {
            println!("Could not call {}: {error}.", registry.get(*index).name);
            if log_events {
                println!("notice|failed|index={index}|error={error}");
            }
        }
        SequenceNotice::Exhausted { attempts } => {
            println!("Nobody answered after {attempts} attempts; giving up.");
            if log_events {
                println!("notice|exhausted|attempts={attempts}");
            }
        }
    }
}

/// Build the dispatcher from the CLI config, press the button once, and
/// report notices until the run ends.
pub fn run_sequence(config: &AppConfig) -> Result<()> {
    let registry = Arc::new(load_registry(config)?);
    let amplitude = Arc::new(SimAmplitudeSource::new());
    let line = Arc::new(SimLine::with_answer_delay(
        Arc::clone(&amplitude),
        Duration::from_millis(config.answer_delay_ms),
    ));
    apply_scenario(&line, &registry, config)?;
    let source = amplitude_source(config, &amplitude)?;

    let mut controller = SequenceController::new(
        Arc::clone(&registry),
        line as Arc<dyn CallLine>,
        source,
        config.sequence_config(),
    );

    let selection = FixedSelection(config.start_index);
    let notices = controller
        .toggle(&selection)?
        .context("button press did not start a run")?;

    while let Ok(notice) = notices.recv() {
        print_notice(&registry, &notice, config.log_events);
    }
    controller.join();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn config(args: &[&str]) -> AppConfig {
        let mut full = vec!["wristcall"];
        full.extend_from_slice(args);
        AppConfig::parse_from(full)
    }

    #[test]
    fn demo_contacts_keep_the_marker_last() {
        let contacts = demo_contacts();
        assert!(contacts.len() >= 2);
        assert!(contacts.last().unwrap().marker);
        assert!(contacts[..contacts.len() - 1].iter().all(|c| !c.marker));
    }

    #[test]
    fn contact_list_rendering_flags_markers() {
        let registry = ContactRegistry::new(demo_contacts()).unwrap();
        let rendered = render_contact_list(&registry);
        assert!(rendered.contains("0. Ana (5550101)"));
        assert!(rendered.contains("3. Emergency (112) [marker]"));
    }

    #[test]
    fn empty_scenario_defaults_to_voiced_answers() {
        let registry = ContactRegistry::new(demo_contacts()).unwrap();
        let amplitude = Arc::new(SimAmplitudeSource::new());
        let line = SimLine::new(Arc::clone(&amplitude));
        apply_scenario(&line, &registry, &config(&[])).unwrap();

        line.place("5550101").unwrap();
        assert_eq!(amplitude.current_amplitude(), DEFAULT_VOICE_AMPLITUDE);
    }

    #[test]
    fn oversized_scenario_is_rejected() {
        let registry = ContactRegistry::new(vec![Contact::new("Ana", "5550101")]).unwrap();
        let amplitude = Arc::new(SimAmplitudeSource::new());
        let line = SimLine::new(amplitude);
        let err = apply_scenario(
            &line,
            &registry,
            &config(&["--scenario", "voice,silent"]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("only 1 contacts"));
    }

    #[test]
    fn run_sequence_happy_path_completes() {
        let cfg = config(&[
            "--ring-timeout-ms",
            "200",
            "--voice-window-ms",
            "100",
            "--poll-interval-ms",
            "10",
        ]);
        cfg.validate().unwrap();
        run_sequence(&cfg).unwrap();
    }

    #[test]
    fn run_sequence_exhausts_a_scripted_no_answer_plan() {
        let cfg = config(&[
            "--scenario",
            "no-answer,no-answer,no-answer",
            "--max-attempts",
            "2",
            "--ring-timeout-ms",
            "100",
            "--voice-window-ms",
            "100",
            "--poll-interval-ms",
            "10",
        ]);
        cfg.validate().unwrap();
        run_sequence(&cfg).unwrap();
    }
}
