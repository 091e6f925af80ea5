// main.rs - Guide AI terminal client
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine as _;

use guide_ai::api_client::{GuideApiClient, DEFAULT_BASE_URL};
use guide_ai::auth::{AuthClient, PasswordChangeFlow, PasswordChangeState, SignupDetails};
use guide_ai::chat::{ChatOrchestrator, SubmitOutcome};
use guide_ai::session::SessionStore;
use guide_ai::types::{ChatThread, Message, MessageRole, VideoSource};
use guide_ai::utils;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging().expect("Failed to initialize logging");

    let base_url =
        std::env::var("GUIDE_API_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
    let state_dir = PathBuf::from(
        std::env::var("GUIDE_STATE_DIR").unwrap_or_else(|_| ".guide_ai".to_string()),
    );

    if let Err(e) = std::fs::create_dir_all(&state_dir) {
        tracing::warn!("Failed to create state directory: {}", e);
    } else {
        tracing::info!("State directory ready: {}", state_dir.display());
    }

    let session = Arc::new(SessionStore::open(&state_dir));
    let api = match GuideApiClient::new(base_url.clone()) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("Failed to build HTTP client: {}", e);
            return;
        }
    };
    let auth = AuthClient::new(api.clone(), Arc::clone(&session));
    let mut chat = ChatOrchestrator::new(Arc::new(api.clone()), Arc::clone(&session));

    println!("Guide AI - Video-Guided Q&A");
    println!("Backend: {}", base_url);
    if session.get() {
        println!("Restored a logged-in session. The backend may still ask you to log in again.");
    } else {
        println!("Use /login or /signup to get started.");
    }
    println!("Type /help for commands. Anything else is sent as a question about the current video.");

    loop {
        let Some(line) = read_line("guide> ") else {
            break;
        };
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let mut parts = command.splitn(2, ' ');
            let name = parts.next().unwrap_or_default();
            let rest = parts.next().unwrap_or_default().trim();

            match name {
                "help" => print_help(),
                "login" => run_login(&auth).await,
                "signup" => run_signup(&auth).await,
                "forgot" => run_forgot_password(),
                "logout" => {
                    auth.logout().await;
                    println!("Logged out.");
                }
                "profile" => run_show_profile(&auth).await,
                "edit" => run_edit_profile(&auth).await,
                "password" => run_password_change(&api).await,
                "url" => {
                    if rest.is_empty() {
                        println!("Usage: /url <video url>");
                    } else {
                        chat.set_source(VideoSource::url(rest));
                        println!("Video source set to {}", rest);
                    }
                }
                "upload" => match file_name_of(rest) {
                    Some(name) => {
                        let source = VideoSource::upload(name);
                        println!("Selected {} for upload.", source.describe());
                        chat.set_source(source);
                    }
                    None => println!("Usage: /upload <path to an existing video file>"),
                },
                "new" => {
                    chat.start_new_thread().await;
                    println!("Started a new conversation.");
                }
                "history" => {
                    chat.refresh_threads().await;
                    render_threads(chat.threads());
                }
                "load" => match rest.parse::<usize>() {
                    Ok(n) if n >= 1 && n <= chat.threads().len() => {
                        let thread = chat.threads()[n - 1].clone();
                        chat.load_thread(&thread);
                        println!("Loaded \"{}\".", thread.title);
                        render_transcript(&chat);
                    }
                    _ => println!("Usage: /load <number from /history>"),
                },
                "chat" => render_transcript(&chat),
                "select" => match rest.parse::<usize>() {
                    Ok(n) if n >= 1 && n <= chat.messages().len() => {
                        let id = chat.messages()[n - 1].id.clone();
                        if chat.select(&id) {
                            println!("Selected message {}.", n);
                        } else {
                            println!("Only assistant responses can be opened in the detail view.");
                        }
                    }
                    _ => println!("Usage: /select <number from /chat>"),
                },
                "view" => match chat.selected() {
                    Some(message) => render_detail(message, rest),
                    None => println!("No response selected yet. Ask a question first."),
                },
                "frames" => match chat.selected() {
                    Some(message) => {
                        let dir = if rest.is_empty() { "frames" } else { rest };
                        match save_frames(message, Path::new(dir)) {
                            Ok(count) => println!("Saved {} frame(s) to {}/", count, dir),
                            Err(e) => println!("Could not save frames: {}", e),
                        }
                    }
                    None => println!("No response selected yet. Ask a question first."),
                },
                "quit" | "exit" => break,
                other => println!("Unknown command /{}. Try /help.", other),
            }
            continue;
        }

        // Anything that is not a command is a question about the video.
        match chat.submit(&line).await {
            SubmitOutcome::Ignored => {
                if chat.source().is_none() {
                    println!("Pick a video first: /url <link> or /upload <file>.");
                }
            }
            SubmitOutcome::Invalid | SubmitOutcome::Failed => {
                if let Some(error) = chat.error() {
                    println!("{}", error);
                }
            }
            SubmitOutcome::Answered => {
                if let Some(message) = chat.selected() {
                    println!();
                    println!("{}", message.content);
                    println!();
                    println!("(/view reasoning, /view frames, /view times for the rest)");
                }
            }
        }
    }

    println!("Goodbye.");
}

fn print_help() {
    println!("Commands:");
    println!("  /login /signup /logout /forgot   account access");
    println!("  /profile /edit /password         account details");
    println!("  /url <link>  /upload <file>      pick the video to ask about");
    println!("  <any text>                       ask a question about the video");
    println!("  /chat /select <n> /view <tab>    browse the transcript (tabs: answer, reasoning, frames, times)");
    println!("  /frames [dir]                    save the selected response's key frames");
    println!("  /new /history /load <n>          manage conversations");
    println!("  /quit                            leave");
}

async fn run_login(auth: &AuthClient) {
    let Some(email) = read_line("Email: ") else { return };
    let Ok(password) = rpassword::prompt_password("Password: ") else {
        return;
    };
    match auth.login(&email, &password).await {
        Ok(user) => {
            let name = if user.first_name.is_empty() {
                user.email.as_str()
            } else {
                user.first_name.as_str()
            };
            println!("Welcome back, {}!", name);
        }
        Err(e) => println!("{}", e),
    }
}

async fn run_signup(auth: &AuthClient) {
    let Some(first_name) = read_line("First name: ") else { return };
    let Some(last_name) = read_line("Last name: ") else { return };
    let Some(email) = read_line("Email: ") else { return };
    let Some(phone_number) = read_line("Phone number (optional): ") else { return };
    let Ok(password) = rpassword::prompt_password("Password: ") else {
        return;
    };
    let Ok(confirm_password) = rpassword::prompt_password("Confirm password: ") else {
        return;
    };

    let details = SignupDetails {
        email,
        password,
        confirm_password,
        first_name,
        last_name,
        phone_number,
    };
    match auth.signup(&details).await {
        Ok(user) => println!("Account created. Welcome, {}!", user.first_name),
        Err(e) => println!("{}", e),
    }
}

fn run_forgot_password() {
    if let Some(email) = read_line("Email: ") {
        if !email.is_empty() {
            println!(
                "If an account exists for {}, reset instructions will be sent there.",
                email
            );
        }
    }
}

async fn run_show_profile(auth: &AuthClient) {
    match auth.profile().await {
        Ok(profile) => {
            println!("Email:        {}", profile.email);
            println!("First name:   {}", profile.first_name);
            println!("Last name:    {}", profile.last_name);
            println!("Phone:        {}", utils::format_phone_display(&profile.phone_number));
            println!("Member since: {}", utils::format_joined_date(&profile.date_joined));
        }
        Err(e) => println!("{}", e),
    }
}

async fn run_edit_profile(auth: &AuthClient) {
    let current = match auth.profile().await {
        Ok(profile) => profile,
        Err(e) => {
            println!("{}", e);
            return;
        }
    };

    println!("Press enter to keep the current value.");
    let first_name = read_default("First name", &current.first_name);
    let last_name = read_default("Last name", &current.last_name);
    let phone_number = read_default("Phone number", &current.phone_number);

    match auth.save_profile(&first_name, &last_name, &phone_number).await {
        Ok(saved) => {
            println!("Profile updated successfully.");
            println!(
                "{} {} - {}",
                saved.first_name,
                saved.last_name,
                utils::format_phone_display(&saved.phone_number)
            );
        }
        Err(e) => println!("{}", e),
    }
}

/// Walk through the request-code → verify-code → new-password steps,
/// looping back to code entry when the backend rejects the code.
async fn run_password_change(api: &GuideApiClient) {
    let mut flow = PasswordChangeFlow::new(Arc::new(api.clone()));

    if let Err(e) = flow.request_code().await {
        println!("{}", e);
        return;
    }
    println!("A verification code was sent to your email. It expires in 5 minutes.");

    loop {
        match flow.state() {
            PasswordChangeState::CodeRequested { .. } => {
                let Some(input) = read_line("Code (or 'resend' / 'back'): ") else {
                    return;
                };
                match input.as_str() {
                    "back" => {
                        flow.reset();
                        return;
                    }
                    "resend" => match flow.request_code().await {
                        Ok(()) => println!("A fresh code is on its way."),
                        Err(e) => {
                            println!("{}", e);
                            if *flow.state() == PasswordChangeState::Idle {
                                return;
                            }
                        }
                    },
                    code => {
                        if let Err(e) = flow.verify_code(code) {
                            println!("{}", e);
                        } else {
                            println!("Code accepted. Now create your new password.");
                        }
                    }
                }
            }
            PasswordChangeState::CodeVerified { .. } => {
                let Ok(new_password) = rpassword::prompt_password("New password: ") else {
                    return;
                };
                let Ok(confirm) = rpassword::prompt_password("Confirm new password: ") else {
                    return;
                };
                match flow.change_password(&new_password, &confirm).await {
                    Ok(()) => {
                        println!("Password changed successfully.");
                        return;
                    }
                    // A rejected code drops the flow back to code entry;
                    // validation failures stay here for another attempt.
                    Err(e) => println!("{}", e),
                }
            }
            _ => return,
        }
    }
}

fn render_transcript(chat: &ChatOrchestrator) {
    if chat.messages().is_empty() {
        println!("No messages yet.");
        return;
    }
    for (i, message) in chat.messages().iter().enumerate() {
        let who = match message.role {
            MessageRole::User => "you",
            MessageRole::Assistant => "guide",
        };
        let mut line = format!("{:>3}. [{}] {}", i + 1, who, first_line(&message.content));
        if let Some(video) = &message.video {
            line.push_str(&format!("  ({})", video.describe()));
        }
        println!("{}", line);
    }
}

fn render_threads(threads: &[ChatThread]) {
    if threads.is_empty() {
        println!("No saved conversations.");
        return;
    }
    for (i, thread) in threads.iter().enumerate() {
        println!(
            "{:>3}. {} - {} message(s), updated {}",
            i + 1,
            thread.title,
            thread.message_count,
            thread.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("Use /load <number> to continue one of them.");
}

fn render_detail(message: &Message, tab: &str) {
    match tab {
        "" | "answer" => println!("{}", message.content),
        "reasoning" => match message.reasoning.as_deref() {
            Some(reasoning) if !reasoning.is_empty() => println!("{}", reasoning),
            _ => println!("No reasoning was provided for this response."),
        },
        "frames" => {
            if message.frames.is_empty() {
                println!("No key frames for this response.");
            }
            for frame in &message.frames {
                println!("[{}] {}", frame.timestamp, frame.description);
            }
        }
        "times" | "timestamps" => {
            if message.timestamps.is_empty() {
                println!("No timestamp ranges for this response.");
            }
            for range in &message.timestamps {
                println!("{} - {}  {}", range.start, range.end, range.content);
            }
        }
        other => println!("Unknown tab '{}'. Tabs: answer, reasoning, frames, times.", other),
    }
}

/// Write the selected response's key frames to disk. `data:` URIs are
/// decoded; anything else is saved as a `.url` pointer file.
fn save_frames(message: &Message, dir: &Path) -> io::Result<usize> {
    std::fs::create_dir_all(dir)?;
    let mut saved = 0;
    for (i, frame) in message.frames.iter().enumerate() {
        let stamp = frame.timestamp.replace(':', "-");
        if let Some((media_type, payload)) = data_uri_parts(&frame.frame) {
            let ext = match media_type {
                "image/png" => "png",
                "image/jpeg" => "jpg",
                "image/svg+xml" => "svg",
                _ => "bin",
            };
            let bytes = match base64::engine::general_purpose::STANDARD.decode(payload) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("Skipping undecodable frame {}: {}", i, e);
                    continue;
                }
            };
            std::fs::write(dir.join(format!("frame_{:02}_{}.{}", i, stamp, ext)), bytes)?;
        } else {
            std::fs::write(
                dir.join(format!("frame_{:02}_{}.url", i, stamp)),
                frame.frame.as_bytes(),
            )?;
        }
        saved += 1;
    }
    Ok(saved)
}

fn data_uri_parts(frame: &str) -> Option<(&str, &str)> {
    frame.strip_prefix("data:")?.split_once(";base64,")
}

fn file_name_of(path: &str) -> Option<String> {
    if path.is_empty() {
        return None;
    }
    let path = Path::new(path);
    if !path.is_file() {
        println!("File not found: {}", path.display());
        return None;
    }
    path.file_name().map(|name| name.to_string_lossy().into_owned())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

fn read_line(prompt: &str) -> Option<String> {
    print!("{}", prompt);
    io::stdout().flush().ok()?;
    let mut line = String::new();
    match io::stdin().read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(line.trim().to_string()),
        Err(_) => None,
    }
}

fn read_default(label: &str, current: &str) -> String {
    match read_line(&format!("{} [{}]: ", label, current)) {
        Some(value) if !value.is_empty() => value,
        _ => current.to_string(),
    }
}

// Production-grade logging configuration
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,guide_ai=trace,reqwest=info,hyper=info".to_string()
        } else {
            "warn,guide_ai=info,reqwest=warn,hyper=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed()
    } else {
        // Keep stdout clean for the chat itself
        fmt::layer()
            .with_target(false)
            .with_writer(io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Guide AI client starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Build mode: {}",
        if cfg!(debug_assertions) { "development" } else { "production" }
    );

    let base_configured = std::env::var("GUIDE_API_BASE_URL").is_ok();
    tracing::info!(
        "Configuration - API base URL: {}, state dir: {}",
        if base_configured { "✅ (from env)" } else { "default" },
        std::env::var("GUIDE_STATE_DIR").unwrap_or_else(|_| ".guide_ai".to_string())
    );

    Ok(())
}
