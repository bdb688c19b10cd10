use chrono::Utc;
use clap::{Arg, ArgAction, ArgMatches, Command};
use log::{error, info, LevelFilter};
use std::env;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lending_desk::auth::{ChallengeAnswer, Role, Session, SignupRequest};
use lending_desk::lending::{ItemId, ReservationId, ReservationStatus};
use lending_desk::storage::{SnapshotFile, StoreSnapshot};
use lending_desk::utils::io::{parse_choices, prompt, prompt_new_secret, prompt_secret};
use lending_desk::utils::time::{format_optional, format_timestamp, utc_to_local};
use lending_desk::utils::{initialize_logging, AuditSink, MemoryAuditLog, SystemClock};
use lending_desk::{DeskConfig, DeskError, LendingDesk, MemoryStore, CHALLENGE_QUESTION_COUNT, LOG_FILE, STORE_FILE};

/// Environment variable holding the store passphrase for non-interactive use
const STORE_KEY_VAR: &str = "LENDING_DESK_STORE_KEY";

type CliResult<T> = Result<T, Box<dyn Error>>;

fn build_cli() -> Command {
    let login_arg = Arg::new("login")
        .long("login")
        .short('l')
        .help("Email or handle to act as")
        .value_name("LOGIN")
        .required(true);

    Command::new("lending-desk")
        .about("Shared lending catalog with role-gated accounts")
        .subcommand_required(true)
        .arg(
            Arg::new("store")
                .long("store")
                .help("Encrypted store file")
                .value_name("PATH")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .help("JSON configuration file")
                .value_name("PATH")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .subcommand(Command::new("questions").about("List the security questions offered at signup"))
        .subcommand(
            Command::new("signup")
                .about("Create an account")
                .arg(Arg::new("email").long("email").required(true).help("Email address"))
                .arg(Arg::new("handle").long("handle").help("Optional login handle"))
                .arg(Arg::new("name").long("name").required(true).help("Full name"))
                .arg(
                    Arg::new("admin")
                        .long("admin")
                        .action(ArgAction::SetTrue)
                        .help("Create the first administrator"),
                ),
        )
        .subcommand(Command::new("login").about("Check credentials").arg(login_arg.clone()))
        .subcommand(Command::new("catalog").about("List the catalog").arg(login_arg.clone()))
        .subcommand(
            Command::new("add-item")
                .about("Add a catalog item (librarian)")
                .arg(login_arg.clone())
                .arg(Arg::new("title").required(true).help("Title"))
                .arg(Arg::new("author").required(true).help("Author")),
        )
        .subcommand(
            Command::new("borrow")
                .about("Borrow an item")
                .arg(login_arg.clone())
                .arg(Arg::new("item").required(true).help("Item identifier")),
        )
        .subcommand(
            Command::new("hold")
                .about("Place a hold on an item")
                .arg(login_arg.clone())
                .arg(Arg::new("item").required(true).help("Item identifier")),
        )
        .subcommand(
            Command::new("cancel-hold")
                .about("Cancel one of your pending holds")
                .arg(login_arg.clone())
                .arg(Arg::new("reservation").required(true).help("Reservation identifier")),
        )
        .subcommand(
            Command::new("return")
                .about("Process the return of an item (librarian)")
                .arg(login_arg.clone())
                .arg(Arg::new("item").required(true).help("Item identifier")),
        )
        .subcommand(Command::new("loans").about("List your holds and loans").arg(login_arg.clone()))
        .subcommand(
            Command::new("reservations")
                .about("List all reservations (librarian)")
                .arg(login_arg.clone()),
        )
        .subcommand(
            Command::new("transition")
                .about("Move a reservation to a new status (librarian)")
                .arg(login_arg.clone())
                .arg(Arg::new("reservation").required(true).help("Reservation identifier"))
                .arg(
                    Arg::new("status")
                        .required(true)
                        .help("borrowed, returned or cancelled"),
                ),
        )
        .subcommand(
            Command::new("transactions")
                .about("List transaction records (admin)")
                .arg(login_arg.clone()),
        )
        .subcommand(
            Command::new("change-password")
                .about("Re-authenticate and change your password")
                .arg(login_arg.clone()),
        )
        .subcommand(
            Command::new("set-role")
                .about("Change an account's role (admin)")
                .arg(login_arg.clone())
                .arg(Arg::new("target").required(true).help("Email or handle of the account"))
                .arg(Arg::new("role").required(true).help("member, librarian or admin")),
        )
        .subcommand(Command::new("audit").about("Show the audit trail (admin)").arg(login_arg))
}

fn store_passphrase() -> CliResult<String> {
    match env::var(STORE_KEY_VAR) {
        Ok(key) if !key.is_empty() => Ok(key),
        _ => Ok(prompt_secret("Store passphrase")?),
    }
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> CliResult<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| format!("missing argument '{}'", name).into())
}

/// Turn a desk error into the text the user is allowed to see
fn public(error: DeskError) -> Box<dyn Error> {
    error.public_message_at(Utc::now()).into()
}

fn sign_in(desk: &LendingDesk, matches: &ArgMatches) -> CliResult<Session> {
    let login = required(matches, "login")?;
    let password = prompt_secret("Password")?;
    desk.authenticate(login, &password).map_err(public)
}

fn signup(desk: &LendingDesk, matches: &ArgMatches) -> CliResult<()> {
    let questions = desk.security_questions();
    println!("Security questions:");
    for question in &questions {
        println!("  {}  {}", question.id, question.text);
    }

    let chosen = parse_choices(&prompt(&format!(
        "Pick {} question ids (e.g. q01,q04)",
        CHALLENGE_QUESTION_COUNT
    ))?);
    let mut challenges = Vec::new();
    for question_id in chosen {
        let text = questions
            .iter()
            .find(|q| q.id == question_id)
            .map(|q| q.text.clone())
            .unwrap_or_default();
        let answer = prompt_secret(&format!("Answer for {}", question_id))?;
        challenges.push(ChallengeAnswer::new(&question_id, &text, &answer));
    }

    let password = prompt_new_secret("Password")?.ok_or("passwords do not match")?;
    let request = SignupRequest {
        email: required(matches, "email")?.to_string(),
        handle: matches.get_one::<String>("handle").cloned(),
        full_name: required(matches, "name")?.to_string(),
        password,
        challenges,
    };

    let identity = if matches.get_flag("admin") {
        desk.bootstrap_admin(request)
    } else {
        desk.create_account(request)
    }
    .map_err(public)?;
    println!("Account created for {} ({})", identity.display_name(), identity.role);
    Ok(())
}

fn change_password(desk: &LendingDesk, session: &Session) -> CliResult<()> {
    let question = desk.security_question(Some(session)).map_err(public)?;
    let current = prompt_secret("Current password")?;
    let answer = prompt_secret(&question.text)?;
    desk.reauthenticate(Some(session), &current, &question.id, &answer)
        .map_err(public)?;

    let new_password = prompt_new_secret("New password")?.ok_or("passwords do not match")?;
    desk.change_password(Some(session), &new_password).map_err(public)?;
    println!("Password changed");
    Ok(())
}

fn dispatch(desk: &LendingDesk, command: &str, matches: &ArgMatches) -> CliResult<()> {
    match command {
        "signup" => signup(desk, matches),
        "login" => {
            let session = sign_in(desk, matches)?;
            println!(
                "Welcome {} ({}). Last successful login: {}",
                session.display_name,
                session.role,
                format_optional(session.last_success_at)
            );
            Ok(())
        }
        "catalog" => {
            let session = sign_in(desk, matches)?;
            let items = desk.list_catalog(Some(&session)).map_err(public)?;
            if items.is_empty() {
                println!("The catalog is empty");
            }
            for item in items {
                let status = if item.lent { "lent" } else { "available" };
                println!("{}  {} by {} [{}]", item.id, item.title, item.author, status);
            }
            Ok(())
        }
        "add-item" => {
            let session = sign_in(desk, matches)?;
            let item = desk
                .create_item(Some(&session), required(matches, "title")?, required(matches, "author")?)
                .map_err(public)?;
            println!("Added {}  {}", item.id, item.title);
            Ok(())
        }
        "borrow" => {
            let session = sign_in(desk, matches)?;
            let item_id: ItemId = required(matches, "item")?.parse()?;
            let (reservation, record) = desk.borrow(Some(&session), item_id).map_err(public)?;
            println!(
                "Borrowed under reservation {} at {}",
                reservation.id,
                utc_to_local(record.at())
            );
            Ok(())
        }
        "hold" => {
            let session = sign_in(desk, matches)?;
            let item_id: ItemId = required(matches, "item")?.parse()?;
            let reservation = desk.place_hold(Some(&session), item_id).map_err(public)?;
            println!("Hold placed: {}", reservation.id);
            Ok(())
        }
        "cancel-hold" => {
            let session = sign_in(desk, matches)?;
            let reservation_id: ReservationId = required(matches, "reservation")?.parse()?;
            desk.cancel_hold(Some(&session), reservation_id).map_err(public)?;
            println!("Hold {} cancelled", reservation_id);
            Ok(())
        }
        "return" => {
            let session = sign_in(desk, matches)?;
            let item_id: ItemId = required(matches, "item")?.parse()?;
            let (reservation, _) = desk.return_item(Some(&session), item_id).map_err(public)?;
            println!("Reservation {} returned", reservation.id);
            Ok(())
        }
        "loans" => {
            let session = sign_in(desk, matches)?;
            let loans = desk.list_own_loans(Some(&session)).map_err(public)?;
            if loans.is_empty() {
                println!("No active holds or loans");
            }
            for (reservation, item) in loans {
                println!(
                    "{}  {} [{}] since {}",
                    reservation.id,
                    item.title,
                    reservation.status,
                    format_timestamp(reservation.status_changed_at)
                );
            }
            Ok(())
        }
        "reservations" => {
            let session = sign_in(desk, matches)?;
            for reservation in desk.list_reservations(Some(&session)).map_err(public)? {
                println!(
                    "{}  item {} by {} [{}] {}",
                    reservation.id,
                    reservation.item_id,
                    reservation.reserved_by,
                    reservation.status,
                    format_timestamp(reservation.status_changed_at)
                );
            }
            Ok(())
        }
        "transition" => {
            let session = sign_in(desk, matches)?;
            let reservation_id: ReservationId = required(matches, "reservation")?.parse()?;
            let status: ReservationStatus = required(matches, "status")?.parse()?;
            let outcome = desk
                .transition_reservation(Some(&session), reservation_id, status)
                .map_err(public)?;
            println!("Reservation {} is now {}", reservation_id, outcome.reservation.status);
            Ok(())
        }
        "transactions" => {
            let session = sign_in(desk, matches)?;
            for record in desk.list_transactions(Some(&session)).map_err(public)? {
                let staff = record
                    .processed_by()
                    .map(|id| format!(" processed by {}", id))
                    .unwrap_or_default();
                println!(
                    "{}  {} item {} for {}{}",
                    format_timestamp(record.at()),
                    record.kind(),
                    record.item_id(),
                    record.identity_id(),
                    staff
                );
            }
            Ok(())
        }
        "change-password" => {
            let session = sign_in(desk, matches)?;
            change_password(desk, &session)
        }
        "set-role" => {
            let session = sign_in(desk, matches)?;
            let role: Role = required(matches, "role")?.parse()?;
            let identity = desk
                .change_role(Some(&session), required(matches, "target")?, role)
                .map_err(public)?;
            println!("{} is now {}", identity.display_name(), identity.role);
            Ok(())
        }
        "audit" => {
            let session = sign_in(desk, matches)?;
            for event in desk.audit_trail(Some(&session)).map_err(public)? {
                println!(
                    "{}  {} actor={} target={} outcome={:?} {}",
                    format_timestamp(event.at),
                    event.event,
                    event.actor,
                    event.target.unwrap_or_default(),
                    event.outcome,
                    event.detail.unwrap_or_default()
                );
            }
            Ok(())
        }
        other => Err(format!("unknown command '{}'", other).into()),
    }
}

fn run(matches: &ArgMatches) -> CliResult<()> {
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => DeskConfig::load(path)?,
        None => DeskConfig::default(),
    };
    let store_path = matches
        .get_one::<PathBuf>("store")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(STORE_FILE));

    let (command, sub_matches) = matches.subcommand().ok_or("no command given")?;
    if command == "questions" {
        // Needs no store
        for question in lending_desk::auth::security_questions() {
            println!("{}  {}", question.id, question.text);
        }
        return Ok(());
    }

    let passphrase = store_passphrase()?;
    let file = SnapshotFile::new(&store_path);
    // Held until the snapshot is saved back
    let _lock = file.lock()?;
    let mut snapshot = file.load(&passphrase)?;
    let events = std::mem::take(&mut snapshot.audit_events);

    let store = Arc::new(MemoryStore::from_snapshot(snapshot));
    let audit = Arc::new(MemoryAuditLog::with_events(events));
    let desk = LendingDesk::new(
        store.clone(),
        store.clone(),
        audit.clone(),
        Arc::new(SystemClock),
        &config,
    )
    .map_err(public)?;

    // Failed commands still leave audit events behind, so always save
    let outcome = dispatch(&desk, command, sub_matches);

    let snapshot = StoreSnapshot {
        audit_events: audit.events(),
        ..store.snapshot()?
    };
    file.save(&snapshot, &passphrase)?;
    info!("Store saved to {}", store_path.display());

    outcome
}

fn main() {
    let matches = build_cli().get_matches();

    if let Err(e) = initialize_logging(Path::new(LOG_FILE), LevelFilter::Info) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(&matches) {
        error!("Command failed: {}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
