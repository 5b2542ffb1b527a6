//! REPL – Read-Eval-Print Loop for the memline timeline shell.
//!
//! Supported slash-commands:
//!   /play /pause /reset         – playback transport
//!   /seek <seconds>             – move the virtual cursor
//!   /speed <multiplier>         – change playback speed
//!   /filter <all|stm|ltm|vision|speech>
//!   /search [text]              – free-text filter (empty clears)
//!   /cluster <name> <kind:id>…  – restrict to a cluster's members
//!   /group <name> <kind:id>…    – restrict to a semantic group's members
//!   /unrestrict                 – drop the cluster/group restriction
//!   /view <timeline|memory|events>
//!   /select <kind> <id>         – pick an entry
//!   /unselect                   – clear the selection
//!   /list [n]                   – print the visible entries
//!   /show                       – print the selected entry
//!   /status                     – stream, services, feed errors
//!   /refresh                    – re-fetch the three feeds
//!   /help
//!   /quit | /exit

use std::str::FromStr;

use chrono::DateTime;
use colored::Colorize;
use memline_engine::{MemberSet, SourceFilter};
use memline_runtime::{SessionHandle, View};
use memline_types::{EntryKey, MemlineError, SourceKind, TimelineEntry};
use tokio::sync::{mpsc, watch};

const DEFAULT_LIST_LEN: usize = 20;

/// One parsed operator command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Pause,
    Reset,
    Seek(f64),
    Speed(f64),
    Filter(SourceFilter),
    Search(String),
    Cluster(MemberSet),
    Group(MemberSet),
    Unrestrict,
    View(View),
    Select(EntryKey),
    Unselect,
    List(usize),
    Show,
    Status,
    Refresh,
    Help,
    Quit,
}

/// Parse one input line into a [`Command`].
pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".into());
    };
    let args: Vec<&str> = words.collect();

    let cmd = match head {
        "/play" => Command::Play,
        "/pause" => Command::Pause,
        "/reset" => Command::Reset,
        "/seek" => Command::Seek(number_arg(&args, "/seek <seconds>")?),
        "/speed" => {
            let speed = number_arg(&args, "/speed <multiplier>")?;
            if !(speed.is_finite() && speed > 0.0) {
                return Err("speed must be a positive number".into());
            }
            Command::Speed(speed)
        }
        "/filter" => {
            let kind = args.first().copied().unwrap_or("all");
            Command::Filter(SourceFilter::from_str(kind).map_err(|e| e.to_string())?)
        }
        "/search" => Command::Search(args.join(" ")),
        "/cluster" => Command::Cluster(member_set_args(&args, "/cluster")?),
        "/group" => Command::Group(member_set_args(&args, "/group")?),
        "/unrestrict" => Command::Unrestrict,
        "/view" => {
            let name = args.first().copied().unwrap_or("timeline");
            Command::View(View::from_str(name)?)
        }
        "/select" => match args.as_slice() {
            [kind, id] => Command::Select(EntryKey::new(
                SourceKind::from_str(kind).map_err(|e| e.to_string())?,
                *id,
            )),
            [pair] => Command::Select(parse_key(pair)?),
            _ => return Err("usage: /select <kind> <id>".into()),
        },
        "/unselect" => Command::Unselect,
        "/list" => match args.first() {
            None => Command::List(DEFAULT_LIST_LEN),
            Some(n) => Command::List(
                n.parse()
                    .map_err(|_| format!("'{n}' is not a count"))?,
            ),
        },
        "/show" => Command::Show,
        "/status" => Command::Status,
        "/refresh" => Command::Refresh,
        "/help" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        other => return Err(format!("unknown command '{other}'")),
    };
    Ok(cmd)
}

fn number_arg(args: &[&str], usage: &str) -> Result<f64, String> {
    match args {
        [value] => value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("'{value}' is not a number")),
        _ => Err(format!("usage: {usage}")),
    }
}

/// `kind:id` → [`EntryKey`].
fn parse_key(pair: &str) -> Result<EntryKey, String> {
    let (kind, id) = pair
        .split_once(':')
        .ok_or_else(|| format!("expected kind:id, got '{pair}'"))?;
    if id.is_empty() {
        return Err(format!("missing id in '{pair}'"));
    }
    let kind = SourceKind::from_str(kind).map_err(|e| e.to_string())?;
    Ok(EntryKey::new(kind, id))
}

fn member_set_args(args: &[&str], cmd: &str) -> Result<MemberSet, String> {
    let Some((name, members)) = args.split_first() else {
        return Err(format!("usage: {cmd} <name> <kind:id>..."));
    };
    members
        .iter()
        .try_fold(MemberSet::new(*name), |set, pair| {
            Ok(set.with_key(parse_key(pair)?))
        })
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop
// ─────────────────────────────────────────────────────────────────────────────

/// Entry point for the interactive REPL.
///
/// Lines arrive from a blocking stdin reader on `lines`; `shutdown` flips to
/// `true` on Ctrl-C. Either ending the input or shutting down closes the
/// session before returning.
pub async fn run(
    handle: SessionHandle,
    mut lines: mpsc::Receiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    // The shutdown channel is closed from the start when no Ctrl-C handler was installed.
    let mut shutdown_open = true;
    prompt();
    loop {
        let line = tokio::select! {
            changed = shutdown.changed(), if shutdown_open => {
                if changed.is_err() {
                    shutdown_open = false;
                } else if *shutdown.borrow() {
                    println!();
                    break;
                }
                continue;
            }
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            prompt();
            continue;
        }

        match parse_command(trimmed) {
            Ok(Command::Quit) => break,
            Ok(cmd) => {
                if let Err(e) = execute(&handle, cmd).await {
                    println!("{}: {}", "Session error".red(), e);
                    break;
                }
            }
            Err(e) => println!(
                "{} {}. Type {} for available commands.",
                "Error:".red(),
                e.yellow(),
                "/help".bold()
            ),
        }
        prompt();
    }

    handle.close().await;
    println!("{}", "Goodbye.".green());
}

fn prompt() {
    use std::io::Write;
    print!("{} ", "memline>".bold().cyan());
    std::io::stdout().flush().ok();
}

async fn execute(handle: &SessionHandle, cmd: Command) -> Result<(), MemlineError> {
    match cmd {
        Command::Play => handle.play().await?,
        Command::Pause => handle.pause().await?,
        Command::Reset => handle.reset().await?,
        Command::Seek(seconds) => handle.seek(seconds).await?,
        Command::Speed(speed) => {
            if !handle.set_speed(speed).await? {
                println!("{}", "Speed rejected.".yellow());
            }
        }
        Command::Filter(filter) => handle.set_filter(filter).await?,
        Command::Search(query) => handle.set_search(query).await?,
        Command::Cluster(members) => handle.set_cluster_selector(members).await?,
        Command::Group(members) => handle.set_group_selector(members).await?,
        Command::Unrestrict => handle.clear_selector().await?,
        Command::View(view) => handle.set_view(view).await?,
        Command::Select(key) => {
            if handle.select_entry(key.clone()).await? {
                show_selected(handle);
            } else {
                println!("{} {}", "No entry".yellow(), key.to_string().bold());
            }
        }
        Command::Unselect => handle.clear_selection().await?,
        Command::List(limit) => list(handle, limit),
        Command::Show => show_selected(handle),
        Command::Status => status(handle),
        Command::Refresh => handle.refresh().await?,
        Command::Help => help(),
        Command::Quit => {}
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn clock_time(seconds: f64) -> String {
    DateTime::from_timestamp(seconds.trunc() as i64, (seconds.fract() * 1e9) as u32)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| format!("{seconds:.0}"))
}

fn headline(entry: &TimelineEntry) -> String {
    let text = entry
        .title
        .as_deref()
        .filter(|t| !t.is_empty())
        .unwrap_or(&entry.content);
    let mut line: String = text.chars().take(60).collect();
    if text.chars().count() > 60 {
        line.push('…');
    }
    line
}

fn list(handle: &SessionHandle, limit: usize) {
    let snap = handle.snapshot();
    let selected = handle.selected_entry().map(|e| e.key());
    let cursor_index = (snap.playback.cursor_seconds / memline_engine::SECONDS_PER_SLOT) as usize;

    println!(
        "{} {} of {} ({})",
        "View".bold(),
        snap.visible.len().to_string().yellow(),
        snap.view_len,
        snap.view.as_str().cyan()
    );
    for (i, entry) in snap.visible.iter().take(limit).enumerate() {
        let marker = if selected.as_ref().is_some_and(|k| entry.has_key(k)) {
            "▶".green().bold()
        } else if snap.playback.is_playing && i == cursor_index {
            "·".cyan()
        } else {
            " ".normal()
        };
        println!(
            "{} {:>4}  {}  {:<6}  {:<12}  {}",
            marker,
            i,
            clock_time(entry.timestamp_seconds).dimmed(),
            entry.source_kind.as_str().cyan(),
            entry.identity,
            headline(entry)
        );
    }
    if snap.visible.len() > limit {
        println!("  … {} more", snap.visible.len() - limit);
    }
}

fn show_selected(handle: &SessionHandle) {
    let Some(entry) = handle.selected_entry() else {
        println!("{}", "Nothing selected.".dimmed());
        return;
    };
    println!();
    println!("{}", entry.key().to_string().bold().underline());
    println!("  time    : {}", clock_time(entry.timestamp_seconds));
    if let Some(title) = &entry.title {
        println!("  title   : {}", title.yellow());
    }
    if let Some(summary) = &entry.summary {
        println!("  summary : {}", summary);
    }
    if !entry.content.is_empty() {
        println!("  content : {}", entry.content);
    }
    if !entry.tags.is_empty() {
        let tags: Vec<&str> = entry.tags.iter().map(String::as_str).collect();
        println!("  tags    : {}", tags.join(", "));
    }
    for (name, value) in &entry.facets {
        println!("  {} = {}", name.dimmed(), value);
    }
    println!();
}

fn status(handle: &SessionHandle) {
    let snap = handle.snapshot();
    let playback = snap.playback;

    println!();
    println!("{}", "Timeline Status".bold().underline());
    println!("  stream    : {}", snap.status.stream().to_string().yellow());
    println!(
        "  playback  : {} at {:.1}s, {}x",
        if playback.is_playing { "playing".green() } else { "paused".normal() },
        playback.cursor_seconds,
        playback.speed_multiplier
    );
    println!("  view      : {}", snap.view);
    println!(
        "  criteria  : filter={} search='{}' selector={}",
        snap.filter,
        snap.search,
        snap.selector.as_deref().unwrap_or("none")
    );
    println!("  live      : {} buffered", snap.live_len);
    for (name, health) in snap.status.services() {
        let state = if health.online { "online".green() } else { "offline".red() };
        println!("  service   : {name} {state} since {}", health.changed_at.format("%H:%M:%S"));
    }
    for (feed, reason) in &snap.source_errors {
        println!("  {} {}: {}", "feed error".red(), feed, reason);
    }
    println!();
}

fn help() {
    println!();
    println!("{}", "memline Commands".bold().underline());
    for (cmd, what) in [
        ("/play  /pause  /reset", "playback transport"),
        ("/seek <seconds>", "move the playback cursor"),
        ("/speed <x>", "set the playback speed multiplier"),
        ("/filter <kind>", "all, stm, ltm, vision or speech"),
        ("/search [text]", "free-text filter, empty clears"),
        ("/cluster <name> <kind:id>...", "restrict to a cluster"),
        ("/group <name> <kind:id>...", "restrict to a semantic group"),
        ("/unrestrict", "drop the cluster/group restriction"),
        ("/view <name>", "timeline, memory or events"),
        ("/select <kind> <id>", "select an entry"),
        ("/unselect", "clear the selection"),
        ("/list [n]", "print visible entries"),
        ("/show", "print the selected entry"),
        ("/status", "stream, services and feed errors"),
        ("/refresh", "re-fetch the memory feeds"),
        ("/quit  /exit", "exit the CLI"),
    ] {
        println!("  {:<30} {}", cmd.bold().cyan(), what);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_commands() {
        assert_eq!(parse_command("/play"), Ok(Command::Play));
        assert_eq!(parse_command("  /pause "), Ok(Command::Pause));
        assert_eq!(parse_command("/seek 12.5"), Ok(Command::Seek(12.5)));
        assert_eq!(parse_command("/exit"), Ok(Command::Quit));
    }

    #[test]
    fn seek_and_speed_need_numbers() {
        assert!(parse_command("/seek").is_err());
        assert!(parse_command("/seek soon").is_err());
        assert!(parse_command("/speed 0").is_err());
        assert!(parse_command("/speed NaN").is_err());
        assert_eq!(parse_command("/speed 4"), Ok(Command::Speed(4.0)));
    }

    #[test]
    fn filter_defaults_to_all() {
        assert_eq!(parse_command("/filter"), Ok(Command::Filter(SourceFilter::All)));
        assert_eq!(parse_command("/filter LTM"), Ok(Command::Filter(SourceFilter::Ltm)));
        assert!(parse_command("/filter smell").is_err());
    }

    #[test]
    fn search_keeps_spaces_and_may_be_empty() {
        assert_eq!(
            parse_command("/search red cup"),
            Ok(Command::Search("red cup".into()))
        );
        assert_eq!(parse_command("/search"), Ok(Command::Search(String::new())));
    }

    #[test]
    fn select_accepts_both_forms() {
        let key = EntryKey::new(SourceKind::Ltm, "l10");
        assert_eq!(parse_command("/select ltm l10"), Ok(Command::Select(key.clone())));
        assert_eq!(parse_command("/select ltm:l10"), Ok(Command::Select(key)));
        assert!(parse_command("/select").is_err());
        assert!(parse_command("/select dream d1").is_err());
    }

    #[test]
    fn cluster_collects_members() {
        let Ok(Command::Cluster(set)) = parse_command("/cluster c1 stm:s5 vision:e1") else {
            panic!("expected a cluster command");
        };
        assert_eq!(set.name, "c1");
        assert_eq!(set.len(), 2);
        assert!(set.contains_key(&EntryKey::new(SourceKind::Vision, "e1")));

        assert!(parse_command("/group").is_err());
        assert!(parse_command("/group g stm").is_err());
        assert!(parse_command("/group g stm:").is_err());
    }

    #[test]
    fn view_aliases() {
        assert_eq!(parse_command("/view"), Ok(Command::View(View::Timeline)));
        assert_eq!(parse_command("/view memory"), Ok(Command::View(View::Memory)));
        assert!(parse_command("/view sideways").is_err());
    }

    #[test]
    fn list_takes_an_optional_count() {
        assert_eq!(parse_command("/list"), Ok(Command::List(DEFAULT_LIST_LEN)));
        assert_eq!(parse_command("/list 5"), Ok(Command::List(5)));
        assert!(parse_command("/list -1").is_err());
    }

    #[test]
    fn unknown_commands_are_rejected() {
        assert!(parse_command("/teleport").is_err());
        assert!(parse_command("").is_err());
    }

    #[test]
    fn headline_prefers_title_and_truncates() {
        let entry = TimelineEntry {
            source_kind: SourceKind::Ltm,
            timestamp_seconds: 0.0,
            identity: "l".into(),
            facets: Default::default(),
            content: "x".repeat(100),
            tags: Default::default(),
            title: Some(String::new()),
            summary: None,
        };
        let line = headline(&entry);
        assert_eq!(line.chars().count(), 61);
        assert!(line.ends_with('…'));
    }

    #[test]
    fn clock_time_formats_epoch_seconds() {
        assert_eq!(clock_time(0.0), "1970-01-01 00:00:00");
    }
}
