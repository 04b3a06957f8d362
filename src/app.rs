//! Application struct and event loop.
//!
//! Wires the environment, location service, alert state machine and trigger
//! channels together, then runs a line-oriented shell over stdin. Shell
//! commands stand in for the host's input events; state-machine events are
//! printed as they arrive.

use std::fmt::Write as _;
use std::future::pending;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Sleep};
use tracing::{info, warn};

use crate::alert::{self, AlertEvent, AlertHandle, Collaborators};
use crate::config::Config;
use crate::constants::FAKE_CALL_CALLER;
use crate::contacts::{ContactSource, ContactStore, ProfileSource, StaticProfile};
use crate::dispatch::{AlertDispatcher, AlertKind, LogDelivery};
use crate::environment::{self, Capabilities, EnvironmentProfile};
use crate::location::share::{route_link, share_message};
use crate::location::{LocationHistory, LocationResult, LocationService, LocationWatch, SharedHistory};
use crate::models::{AlertState, NewContact};
use crate::notifications::{Notifier, SystemNotifier};
use crate::safety::{format_call_duration, FakeCall, SafeMode};
use crate::triggers::host::HeadlessHost;
use crate::triggers::{ChannelInput, Delivery, KeyInput, MountedTriggers, TriggerAggregator};
use crate::utils::{format_timestamp, lock};

const HELP: &str = "\
Commands:
  sos                          press the SOS control
  key <media|space|CODE>       key press on the keyboard channel
  bridge <json>                message from the embedding shell
  event <name>                 synthetic activation event
  fallback                     press the injected fallback control
  cancel                       cancel a running countdown
  dismiss                      close the dispatch confirmation
  where                        one-shot location fix
  watch start|stop             continuous location updates
  history                      recent fixes, newest first
  contacts                     list emergency contacts
  add <name>|<phone>|<relation> add a contact
  remove <id>                  remove a contact
  silent                       send a silent alert now
  group                        alert every contact now
  share                        shareable location message
  route <destination>          walking directions from here
  fakecall [end]               start or end a simulated incoming call
  safemode                     toggle Safe Mode
  status                       current state and channels
  help                         this text
  quit                         exit";

/// One parsed shell line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Sos,
    Key(KeyInput),
    Bridge(String),
    Event(String),
    Fallback,
    Cancel,
    Dismiss,
    Where,
    WatchStart,
    WatchStop,
    History,
    Contacts,
    Add(NewContact),
    Remove(String),
    Silent,
    Group,
    Share,
    Route(String),
    FakeCall,
    EndCall,
    SafeMode,
    Status,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (cmd, rest) = match line.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd, rest.trim()),
            None => (line, ""),
        };

        let command = match cmd.to_lowercase().as_str() {
            "sos" => Command::Sos,
            "key" if !rest.is_empty() => Command::Key(KeyInput::from_token(rest)),
            "key" => return Err("usage: key <media|space|CODE>".to_string()),
            "bridge" => Command::Bridge(rest.to_string()),
            "event" if !rest.is_empty() => Command::Event(rest.to_string()),
            "event" => return Err("usage: event <name>".to_string()),
            "fallback" => Command::Fallback,
            "cancel" => Command::Cancel,
            "dismiss" => Command::Dismiss,
            "where" => Command::Where,
            "watch" => match rest {
                "start" => Command::WatchStart,
                "stop" => Command::WatchStop,
                _ => return Err("usage: watch start|stop".to_string()),
            },
            "history" => Command::History,
            "contacts" => Command::Contacts,
            "add" => {
                let fields: Vec<&str> = rest.split('|').map(str::trim).collect();
                match fields.as_slice() {
                    [name, phone, relationship] if !name.is_empty() && !phone.is_empty() => {
                        Command::Add(NewContact {
                            name: name.to_string(),
                            phone: phone.to_string(),
                            relationship: relationship.to_string(),
                        })
                    }
                    _ => return Err("usage: add <name>|<phone>|<relationship>".to_string()),
                }
            }
            "remove" if !rest.is_empty() => Command::Remove(rest.to_string()),
            "remove" => return Err("usage: remove <id>".to_string()),
            "silent" => Command::Silent,
            "group" => Command::Group,
            "share" => Command::Share,
            "route" if !rest.is_empty() => Command::Route(rest.to_string()),
            "route" => return Err("usage: route <destination>".to_string()),
            "fakecall" => match rest {
                "" => Command::FakeCall,
                "end" => Command::EndCall,
                _ => return Err("usage: fakecall [end]".to_string()),
            },
            "safemode" => Command::SafeMode,
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "" => return Err(String::new()),
            other => return Err(format!("unknown command '{}', try 'help'", other)),
        };
        Ok(command)
    }
}

/// What a pending one-shot fix is for.
#[derive(Debug, Clone)]
enum FixPurpose {
    Where,
    Alert(AlertKind),
    Share,
    Route(String),
}

/// Main application struct.
pub struct App {
    capabilities: Capabilities,
    headset: bool,
    alert: AlertHandle,
    events: mpsc::UnboundedReceiver<AlertEvent>,
    triggers: MountedTriggers,
    location: Arc<LocationService>,
    history: SharedHistory,
    contacts: Arc<ContactStore>,
    profile: Arc<StaticProfile>,
    dispatcher: AlertDispatcher,
    notifier: Arc<SystemNotifier>,
    watch: Option<LocationWatch>,
    fake_call: Option<FakeCall>,
    call_connect: Option<Pin<Box<Sleep>>>,
    safe_mode: SafeMode,
    fix_tx: mpsc::UnboundedSender<(FixPurpose, LocationResult)>,
    fix_rx: mpsc::UnboundedReceiver<(FixPurpose, LocationResult)>,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        let capabilities = Capabilities::detect(&config.runtime_signals());
        let headset = environment::headset_connected(&config.audio_outputs());
        info!(
            profile = %capabilities.profile,
            standalone = capabilities.display_standalone,
            geolocation = capabilities.geolocation,
            headset,
            "environment classified"
        );

        let location = Arc::new(LocationService::new(
            Arc::new(config.simulated_provider()),
            config.position_options(),
            capabilities.geolocation,
        ));
        let history = LocationHistory::shared();
        let contacts = Arc::new(ContactStore::open(&config.contacts_file));
        let profile = Arc::new(StaticProfile::new(config.user_name.clone()));
        let dispatcher = AlertDispatcher::new(Arc::new(LogDelivery));
        let notifier = Arc::new(SystemNotifier::new(capabilities.notifications));

        let (alert, events) = alert::spawn(
            config.alert_timing(),
            Collaborators {
                location: location.clone(),
                contacts: contacts.clone(),
                profile: profile.clone(),
                dispatcher: dispatcher.clone(),
                notifier: notifier.clone(),
                history: history.clone(),
            },
        );

        let triggers = TriggerAggregator::new(capabilities.clone(), alert.clone())
            .mount(Arc::new(HeadlessHost::new()))
            .context("mounting trigger channels")?;
        for warning in triggers.warnings() {
            println!("⚠ {}", warning);
        }

        let (fix_tx, fix_rx) = mpsc::unbounded_channel();

        Ok(Self {
            capabilities,
            headset,
            alert,
            events,
            triggers,
            location,
            history,
            contacts,
            profile,
            dispatcher,
            notifier,
            watch: None,
            fake_call: None,
            call_connect: None,
            safe_mode: SafeMode::default(),
            fix_tx,
            fix_rx,
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        println!("SafeGuard ({}) - type 'help' for commands", self.capabilities.profile);
        println!("{}", self.prompt(None));

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line.context("reading stdin")? {
                    Some(line) => {
                        if self.handle_line(&line) {
                            break; // quit requested
                        }
                    }
                    None => break,
                },
                Some(event) = self.events.recv() => {
                    println!("{}", describe_event(&event, self.capabilities.profile, self.headset));
                }
                Some((purpose, result)) = self.fix_rx.recv() => self.on_fix(purpose, result),
                update = next_watch_update(&mut self.watch) => self.on_watch_update(update),
                _ = call_connected(&mut self.call_connect) => {
                    self.call_connect = None;
                    if let Some(call) = &self.fake_call {
                        println!("{}", call.display());
                    }
                }
            }
        }

        self.location.stop_watch();
        println!("Stopped.");
        Ok(())
    }

    fn prompt(&self, countdown: Option<u32>) -> String {
        environment::sos_prompt(countdown, self.capabilities.profile, self.headset)
    }

    /// Returns true when the shell should exit.
    fn handle_line(&mut self, line: &str) -> bool {
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                if !e.is_empty() {
                    println!("{}", e);
                }
                return false;
            }
        };

        match command {
            Command::Sos => self.deliver(ChannelInput::Press),
            Command::Key(key) => self.deliver(ChannelInput::Key(key)),
            Command::Bridge(payload) => self.deliver(ChannelInput::Message(payload)),
            Command::Event(name) => self.deliver(ChannelInput::CustomEvent(name)),
            Command::Fallback => self.deliver(ChannelInput::FallbackClick),
            Command::Cancel => match self.alert.state() {
                AlertState::Countdown { remaining } if remaining > 0 => {
                    self.alert.cancel();
                }
                state => println!("Nothing to cancel ({}).", state),
            },
            Command::Dismiss => {
                self.alert.dismiss();
            }
            Command::Where => self.request_fix(FixPurpose::Where),
            Command::WatchStart => {
                self.watch = Some(self.location.start_watch());
                println!("Watching location.");
            }
            Command::WatchStop => {
                let stopped = self.location.stop_watch();
                self.watch = None;
                if stopped {
                    println!("Stopped watching location.");
                } else {
                    println!("Not watching.");
                }
            }
            Command::History => println!("{}", self.history_text()),
            Command::Contacts => println!("{}", self.contacts_text()),
            Command::Add(contact) => match self.contacts.add(contact) {
                Ok(c) => println!("Added {} ({}) as {}", c.name, c.phone, c.id),
                Err(e) => println!("Could not add contact: {:#}", e),
            },
            Command::Remove(id) => match self.contacts.remove(&id) {
                Ok(true) => println!("Removed {}", id),
                Ok(false) => println!("No contact with id {}", id),
                Err(e) => println!("Could not remove contact: {:#}", e),
            },
            Command::Silent => self.request_fix(FixPurpose::Alert(AlertKind::Silent)),
            Command::Group => self.request_fix(FixPurpose::Alert(AlertKind::Group)),
            Command::Share => self.request_fix(FixPurpose::Share),
            Command::Route(destination) => self.request_fix(FixPurpose::Route(destination)),
            Command::FakeCall => match &self.fake_call {
                Some(call) => println!("{}", call.display()),
                None => {
                    let call = FakeCall::start(FAKE_CALL_CALLER);
                    self.call_connect = Some(Box::pin(sleep_until(call.connects_at())));
                    println!("{}", call.display());
                    println!("   Simulated call. Your real contacts will not be notified.");
                    info!("fake call started");
                    self.fake_call = Some(call);
                }
            },
            Command::EndCall => match self.fake_call.take() {
                Some(call) => {
                    self.call_connect = None;
                    info!(secs = call.elapsed().as_secs(), "fake call ended");
                    println!("Call ended ({})", format_call_duration(call.elapsed()));
                }
                None => println!("No call in progress."),
            },
            Command::SafeMode => {
                if self.safe_mode.toggle() {
                    self.request_fix(FixPurpose::Where);
                }
                info!(active = self.safe_mode.is_active(), "safe mode toggled");
                println!("{}", self.safe_mode.notice());
            }
            Command::Status => println!("{}", self.status_text()),
            Command::Help => println!("{}", HELP),
            Command::Quit => return true,
        }
        false
    }

    fn deliver(&self, input: ChannelInput) {
        match self.triggers.deliver(input) {
            Delivery::Activated {
                suppress_default: true,
                channel,
            } => println!("({} default action suppressed)", channel),
            Delivery::Activated { .. } => {}
            Delivery::Ignored(reason) => println!("Ignored: {:?}", reason),
        }
    }

    /// Fetch a fix without blocking the shell; the result comes back
    /// through `fix_rx`.
    fn request_fix(&self, purpose: FixPurpose) {
        let location = self.location.clone();
        let tx = self.fix_tx.clone();
        tokio::spawn(async move {
            let result = location.current_position().await;
            let _ = tx.send((purpose, result));
        });
    }

    fn on_fix(&mut self, purpose: FixPurpose, result: LocationResult) {
        if let Ok(sample) = &result {
            lock(&self.history).record(sample.clone());
        }

        match purpose {
            FixPurpose::Where => match result {
                Ok(sample) => println!(
                    "📍 {} (±{:.0} m, {})\n   {}",
                    sample.coordinates_display(),
                    sample.accuracy_meters,
                    sample.accuracy_grade(),
                    sample.map_link()
                ),
                Err(e) => println!("⚠ {}", e),
            },
            FixPurpose::Alert(kind) => {
                let sample = result
                    .map_err(|e| warn!(%kind, error = %e, "sending without location"))
                    .ok();
                let contacts = self.contacts.contacts();
                let user_name = self.profile.display_name();
                match self
                    .dispatcher
                    .send(kind, user_name.as_deref(), sample.as_ref(), &contacts)
                {
                    Ok(receipt) => {
                        if kind == AlertKind::Group {
                            self.notifier.notify(&receipt);
                        }
                        println!(
                            "{} alert sent to {} contacts ({})",
                            kind,
                            receipt.sent_count,
                            receipt
                                .sample
                                .as_ref()
                                .map(|s| s.map_link())
                                .unwrap_or_else(|| "location unavailable".to_string())
                        );
                    }
                    Err(e) => println!("⚠ {}", e),
                }
            }
            FixPurpose::Share => match result {
                Ok(sample) => println!("{}", share_message(&sample, &chrono::Local::now())),
                Err(e) => println!("⚠ {}", e),
            },
            FixPurpose::Route(destination) => match result {
                Ok(sample) => println!("{}", route_link(&sample, &destination)),
                Err(e) => println!("⚠ {}", e),
            },
        }
    }

    fn on_watch_update(&mut self, update: Option<LocationResult>) {
        match update {
            Some(Ok(sample)) => {
                println!("📍 {} (±{:.0} m)", sample.coordinates_display(), sample.accuracy_meters);
                lock(&self.history).record(sample);
            }
            Some(Err(e)) => println!("⚠ {}", e),
            None => {
                self.watch = None;
                println!("Location watch ended.");
            }
        }
    }

    fn history_text(&self) -> String {
        let history = lock(&self.history);
        if history.is_empty() {
            return "No location history yet.".to_string();
        }
        let mut out = String::new();
        for (i, sample) in history.iter().enumerate() {
            let at = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(sample.captured_at_epoch_ms)
                .map(|t| format_timestamp(&t.with_timezone(&chrono::Local)))
                .unwrap_or_default();
            let _ = writeln!(out, "{}. {}  ±{:.0} m  {}", i + 1, sample.coordinates_display(), sample.accuracy_meters, at);
        }
        out.trim_end().to_string()
    }

    fn contacts_text(&self) -> String {
        let contacts = self.contacts.list();
        if contacts.is_empty() {
            return "No emergency contacts. Add one with: add <name>|<phone>|<relationship>".to_string();
        }
        contacts
            .iter()
            .map(|c| format!("{}  {} ({})  {}", c.id, c.name, c.relationship, c.phone))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn status_text(&self) -> String {
        let state = self.alert.state();
        let channels: Vec<String> = self.triggers.channels().iter().map(|c| c.to_string()).collect();
        format!(
            "State: {}\nEnvironment: {}\nChannels: {}\nLocation watch: {}\nSafe mode: {}\nHistory: {} fixes\nContacts: {}\n{}",
            state,
            self.capabilities.profile,
            channels.join(", "),
            if self.location.is_watching() { "on" } else { "off" },
            if self.safe_mode.is_active() { "on" } else { "off" },
            lock(&self.history).len(),
            self.contacts.list().len(),
            self.prompt(state.seconds_remaining())
        )
    }
}

async fn next_watch_update(watch: &mut Option<LocationWatch>) -> Option<LocationResult> {
    match watch {
        Some(watch) => watch.next().await,
        None => pending().await,
    }
}

async fn call_connected(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline {
        Some(deadline) => deadline.as_mut().await,
        None => pending().await,
    }
}

/// One line of shell output for a state-machine event.
pub fn describe_event(event: &AlertEvent, profile: EnvironmentProfile, headset: bool) -> String {
    match event {
        AlertEvent::StateChanged { state, .. } => match state {
            AlertState::Countdown { remaining } => {
                format!("⏳ {}", environment::sos_prompt(Some(*remaining), profile, headset))
            }
            AlertState::Dispatched => "🚨 ALERT SENT".to_string(),
            AlertState::Cancelled => "Emergency alert cancelled.".to_string(),
            AlertState::Idle => environment::sos_prompt(None, profile, headset),
        },
        AlertEvent::Located { sample, .. } => format!(
            "📍 Location locked: {} ({} accuracy)",
            sample.coordinates_display(),
            sample.accuracy_grade()
        ),
        AlertEvent::Dispatched { receipt, .. } => format!(
            "Alert sent to {} emergency contacts at {}\n📍 {}",
            receipt.sent_count,
            format_timestamp(&receipt.sent_at),
            receipt
                .sample
                .as_ref()
                .map(|s| s.map_link())
                .unwrap_or_else(|| "Location unavailable".to_string())
        ),
        AlertEvent::Notice { error, .. } => format!("⚠ {}", error),
    }
}
