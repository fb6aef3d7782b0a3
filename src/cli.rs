use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::backend::{AuthClient, Backend, ObjectStore};
use crate::camera::command::CommandDevice;
use crate::camera::{CameraController, Facing, StreamConstraints};
use crate::chat::ChatView;
use crate::config::Config;
use crate::gallery::{DetailView, ResolvedImage, SearchState, SearchView};
use crate::likes::LikeToggle;
use crate::media::Blob;
use crate::records::{ChatMessage, ImageRecord, Role, User};
use crate::remote::{Annotator, HttpAnnotator, HttpChatbot};
use crate::session::SessionContext;
use crate::store::{ImageStore, PostgrestStore};
use crate::upload::{Annotation, UploadOutcome, Uploader};

#[derive(Parser)]
#[command(name = "jadoo", version, about = "Capture, caption, search, and chat about photos")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Register a new account
    Signup {
        email: String,
        password: String,
        /// Where the confirmation link should send the browser afterwards
        #[arg(long)]
        redirect_to: Option<String>,
    },
    /// Sign in with email and password
    Login { email: String, password: String },
    /// Sign out and drop the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Capture a photo from the camera and upload it
    Capture {
        /// Which camera to use: user or environment
        #[arg(long)]
        facing: Option<Facing>,
        /// Discard this many warm-up shots before the kept one
        #[arg(long, default_value_t = 0)]
        retakes: u32,
        /// List video devices instead of capturing
        #[arg(long)]
        list_devices: bool,
    },
    /// Upload an image file
    Upload { path: PathBuf },
    /// Search images by tag, then browse the results
    Search { query: String },
    /// Show one image
    Show {
        id: String,
        /// Download the image to this path
        #[arg(long)]
        download: Option<PathBuf>,
    },
    /// Toggle your like on an image
    Like { id: String },
    /// Print the showcase strip and the most-liked rail
    Gallery {
        /// How many most-liked images to list
        #[arg(long)]
        most_liked: Option<usize>,
    },
    /// Chat about the most recently uploaded image
    Chat {
        /// Seed the conversation from this image id
        #[arg(long)]
        image: Option<String>,
    },
    /// Re-run annotation for an image
    Annotate { id: String },
}

/// Everything the subcommands need, built once from the configuration.
struct App {
    config: Config,
    session: SessionContext,
    auth: AuthClient,
    storage: Arc<dyn ObjectStore>,
    store: Arc<PostgrestStore>,
    annotator: Arc<HttpAnnotator>,
    chatbot: Arc<HttpChatbot>,
}

impl App {
    async fn build(config_path: &Path) -> anyhow::Result<Self> {
        let config = Config::from_file(config_path)?;
        let session = SessionContext::with_file(config.session.file.clone());
        session.restore().await?;

        let http = reqwest::Client::new();
        let Backend {
            auth,
            rows,
            storage,
        } = Backend::new(http.clone(), &config, session.clone());
        let storage: Arc<dyn ObjectStore> = Arc::new(storage);
        let store = Arc::new(PostgrestStore::new(rows));
        let annotator = Arc::new(HttpAnnotator::new(
            http.clone(),
            config.services.annotator_url.clone(),
        ));
        let chatbot = Arc::new(HttpChatbot::new(http, config.services.chatbot_url.clone()));
        Ok(Self {
            config,
            session,
            auth,
            storage,
            store,
            annotator,
            chatbot,
        })
    }

    fn uploader(&self) -> Uploader {
        Uploader::new(
            self.storage.clone(),
            self.store.clone(),
            self.annotator.clone(),
            self.config.storage.image_bucket.clone(),
            self.config.storage.cache_control,
        )
    }

    fn search_view(&self) -> SearchView {
        SearchView::new(
            self.store.clone(),
            self.storage.clone(),
            self.config.storage.image_bucket.clone(),
            self.config.storage.signed_url_ttl,
        )
    }

    async fn require_user(&self, message: &str) -> anyhow::Result<User> {
        match self.session.user().await {
            Some(user) => Ok(user),
            None => bail!("{message}"),
        }
    }

    /// Signed URL for an image, or the stored value when signing fails.
    async fn display_url(&self, record: &ImageRecord) -> String {
        match self
            .storage
            .signed_url(
                &self.config.storage.image_bucket,
                &record.storage_key,
                self.config.storage.signed_url_ttl,
            )
            .await
        {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("signed URL failed for {}: {e}", record.storage_key);
                record.storage_key.clone()
            }
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let app = App::build(&cli.config).await?;
    match cli.command {
        Command::Signup {
            email,
            password,
            redirect_to,
        } => signup(&app, &email, &password, redirect_to.as_deref()).await,
        Command::Login { email, password } => login(&app, &email, &password).await,
        Command::Logout => logout(&app).await,
        Command::Whoami => whoami(&app).await,
        Command::Capture {
            facing,
            retakes,
            list_devices,
        } => capture(&app, facing, retakes, list_devices).await,
        Command::Upload { path } => upload(&app, &path).await,
        Command::Search { query } => search(&app, &query).await,
        Command::Show { id, download } => show(&app, &id, download.as_deref()).await,
        Command::Like { id } => like(&app, &id).await,
        Command::Gallery { most_liked } => gallery(&app, most_liked).await,
        Command::Chat { image } => chat(&app, image.as_deref()).await,
        Command::Annotate { id } => annotate(&app, &id).await,
    }
}

async fn signup(
    app: &App,
    email: &str,
    password: &str,
    redirect_to: Option<&str>,
) -> anyhow::Result<()> {
    let outcome = app.auth.sign_up(email, password, redirect_to).await?;
    if outcome.confirmation_sent {
        println!("Account created. Check your email to confirm before logging in.");
    } else {
        println!("Account created.");
    }
    Ok(())
}

async fn login(app: &App, email: &str, password: &str) -> anyhow::Result<()> {
    let session = app.auth.sign_in(email, password).await?;
    let who = session.user.email.unwrap_or(session.user.id);
    println!("Logged in as {who}.");
    Ok(())
}

async fn logout(app: &App) -> anyhow::Result<()> {
    app.auth.sign_out().await?;
    println!("Logged out.");
    Ok(())
}

async fn whoami(app: &App) -> anyhow::Result<()> {
    match app.auth.current_user().await? {
        Some(user) => {
            println!("{}", user.email.as_deref().unwrap_or("(no email)"));
            println!("id: {}", user.id);
        }
        None => println!("Not logged in."),
    }
    Ok(())
}

async fn capture(
    app: &App,
    facing: Option<Facing>,
    retakes: u32,
    list_devices: bool,
) -> anyhow::Result<()> {
    app.require_user("Please log in before capturing.").await?;

    let devices = Arc::new(CommandDevice::new(app.config.camera.clone()));
    let constraints = StreamConstraints {
        facing: facing.unwrap_or(app.config.camera.facing),
        ideal_width: app.config.camera.width,
        ideal_height: app.config.camera.height,
    };
    let mut camera = CameraController::new(devices, constraints);

    if list_devices {
        for input in camera.inputs().await? {
            match input.facing {
                Some(facing) => println!("{}  {} ({facing})", input.id, input.label),
                None => println!("{}  {}", input.id, input.label),
            }
        }
        return Ok(());
    }

    camera.start().await?;
    for shot in 0..retakes {
        camera.capture().await?;
        println!("Discarded warm-up shot {}.", shot + 1);
        camera.retake().await?;
    }
    let data_url = camera.capture().await?;
    println!("Captured frame from the {} camera.", camera.facing());
    camera.shutdown();

    let outcome = match app.uploader().upload_capture(&data_url).await {
        Ok(outcome) => outcome,
        Err(e) => bail!("{}", e.user_message()),
    };
    report_upload(&outcome);
    Ok(())
}

async fn upload(app: &App, path: &Path) -> anyhow::Result<()> {
    app.require_user("Please log in before uploading.").await?;

    let blob = Blob::from_file(path).await?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload.bin");
    let outcome = match app.uploader().upload_file(&blob, name).await {
        Ok(outcome) => outcome,
        Err(e) => bail!("{}", e.user_message()),
    };
    report_upload(&outcome);
    Ok(())
}

fn report_upload(outcome: &UploadOutcome) {
    println!("Uploaded as {}", outcome.key);
    println!("url: {}", outcome.public_url);
    match (&outcome.record, &outcome.annotation) {
        (Some(record), Annotation::Completed) => {
            if let Some(description) = &record.description {
                println!("description: {description}");
            }
            if let Some(tags) = &record.tags {
                println!("tags: {tags}");
            }
        }
        (_, Annotation::Failed(message)) => println!("{message}"),
        (None, _) => println!("Image stored, but its gallery entry could not be created."),
        _ => {}
    }
}

async fn search(app: &App, query: &str) -> anyhow::Result<()> {
    let user = app
        .require_user("Please log in to view search results.")
        .await?;

    let mut view = app.search_view();
    view.search(query).await;
    match view.state() {
        SearchState::Idle => {
            println!("Nothing to search for.");
            return Ok(());
        }
        SearchState::Empty { .. } => {
            if let Some(message) = view.state().no_results_message() {
                println!("{message}");
            }
            return Ok(());
        }
        SearchState::Error(message) => bail!("{message}"),
        SearchState::Results(images) => {
            for (index, image) in images.iter().enumerate() {
                print_result(index, image);
            }
        }
        SearchState::Searching => return Ok(()),
    }

    let mut lines = stdin_lines();
    loop {
        if view.detail().is_some() {
            println!("(detail) like | download <path> | back | quit");
        } else {
            println!("Enter a result number to open it, or press Enter to quit.");
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() || line == "quit" {
            break;
        }
        if view.detail().is_some() {
            detail_command(&mut view, &user, &line).await?;
        } else if let Ok(index) = line.parse::<usize>() {
            match view.open(index, &user.id).await {
                Ok(detail) => print_detail(detail),
                Err(e) => println!("{}", e.user_message()),
            }
        } else {
            println!("Unknown command: {line}");
        }
    }
    Ok(())
}

async fn detail_command(view: &mut SearchView, user: &User, line: &str) -> anyhow::Result<()> {
    if line == "back" {
        view.close();
        return Ok(());
    }
    if line == "like" {
        match view.toggle_like(&user.id).await {
            Ok(state) if state.liked => println!("Liked ({})", state.count),
            Ok(state) => println!("Unliked ({})", state.count),
            Err(e) => println!("{}", e.user_message()),
        }
        return Ok(());
    }
    if let Some(path) = line.strip_prefix("download ") {
        match view.download(Path::new(path.trim())).await {
            Ok(bytes) => println!("Wrote {bytes} bytes to {}", path.trim()),
            Err(e) => println!("{}", e.user_message()),
        }
        return Ok(());
    }
    println!("Unknown command: {line}");
    Ok(())
}

async fn show(app: &App, id: &str, download: Option<&Path>) -> anyhow::Result<()> {
    let user = app.require_user("Please log in to view images.").await?;

    let Some(record) = app.store.image(id).await? else {
        bail!("No image with id {id}");
    };
    let display_url = app.display_url(&record).await;

    let likes = LikeToggle::new(app.store.clone());
    let state = likes.state(&user.id, &record.id).await?;
    println!("{}", record.id);
    if let Some(description) = &record.description {
        println!("description: {description}");
    }
    if let Some(tags) = &record.tags {
        println!("tags: {tags}");
    }
    println!("likes: {}{}", state.count, if state.liked { " (yours)" } else { "" });
    println!("url: {display_url}");

    if let Some(destination) = download {
        let bytes = app.storage.fetch(&display_url).await?;
        tokio::fs::write(destination, &bytes).await?;
        println!("Wrote {} bytes to {}", bytes.len(), destination.display());
    }
    Ok(())
}

async fn like(app: &App, id: &str) -> anyhow::Result<()> {
    let user = app.require_user("Please log in to like images.").await?;
    let likes = LikeToggle::new(app.store.clone());
    let state = likes.toggle(&user.id, id).await?;
    if state.liked {
        println!("Liked ({})", state.count);
    } else {
        println!("Unliked ({})", state.count);
    }
    Ok(())
}

async fn gallery(app: &App, most_liked: Option<usize>) -> anyhow::Result<()> {
    let view = app.search_view();

    println!("Showcase:");
    let strip = view.showcase(&app.config.gallery.showcase_tags).await?;
    if strip.is_empty() {
        println!("  (nothing tagged yet)");
    }
    for (index, image) in strip.iter().enumerate() {
        print_result(index, image);
    }

    println!("Most liked:");
    let limit = most_liked.unwrap_or(app.config.gallery.most_liked_limit);
    let rail = view.most_liked(limit).await?;
    for (index, image) in rail.iter().enumerate() {
        print_result(index, image);
    }
    Ok(())
}

async fn chat(app: &App, seed_id: Option<&str>) -> anyhow::Result<()> {
    let user = app.require_user("Please login to proceed.").await?;

    let mut view = ChatView::new(
        app.store.clone(),
        app.store.clone(),
        app.storage.clone(),
        app.chatbot.clone(),
        &user.id,
        &app.config.storage,
    );

    if let Some(id) = seed_id {
        let Some(record) = app.store.image(id).await? else {
            bail!("No image with id {id}");
        };
        let display_url = app.display_url(&record).await;
        view.seed_image(&record, &display_url).await;
        for message in view.transcript() {
            print_turn(message);
        }
    }

    println!("Chat about your latest image. /attach <path>, /clear, /quit to leave.");
    let mut lines = stdin_lines();
    loop {
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line == "/quit" {
            break;
        }
        if line == "/clear" {
            view.clear().await;
            println!("Conversation cleared.");
            continue;
        }
        if let Some(path) = line.strip_prefix("/attach ") {
            let path = Path::new(path.trim());
            let blob = Blob::from_file(path).await?;
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("attachment.png");
            let before = view.transcript().len();
            view.attach(&blob, name).await;
            for message in &view.transcript()[before..] {
                print_turn(message);
            }
            continue;
        }
        let before = view.transcript().len();
        view.send(&line).await;
        for message in &view.transcript()[before..] {
            print_turn(message);
        }
    }
    Ok(())
}

async fn annotate(app: &App, id: &str) -> anyhow::Result<()> {
    app.annotator.annotate(id).await?;
    match app.store.image(id).await? {
        Some(record) => {
            println!("Annotated {id}.");
            if let Some(description) = &record.description {
                println!("description: {description}");
            }
            if let Some(tags) = &record.tags {
                println!("tags: {tags}");
            }
        }
        None => println!("Annotation ran, but the row could not be read back."),
    }
    Ok(())
}

fn stdin_lines() -> Lines<BufReader<Stdin>> {
    BufReader::new(tokio::io::stdin()).lines()
}

fn print_result(index: usize, image: &ResolvedImage) {
    println!("[{index}] {}", image.record.id);
    if let Some(description) = &image.record.description {
        println!("    {description}");
    }
    if let Some(tags) = &image.record.tags {
        println!("    tags: {tags}");
    }
    println!("    url: {}", image.display_url);
}

fn print_detail(detail: &DetailView) {
    println!("{}", detail.image.record.id);
    if let Some(description) = &detail.image.record.description {
        println!("description: {description}");
    }
    if let Some(tags) = &detail.image.record.tags {
        println!("tags: {tags}");
    }
    println!(
        "likes: {}{}",
        detail.like_count,
        if detail.liked { " (yours)" } else { "" }
    );
    println!("url: {}", detail.image.display_url);
}

fn print_turn(message: &ChatMessage) {
    let who = match message.role {
        Role::User => "you",
        Role::Agent => "jadoo",
    };
    match &message.image_url {
        Some(url) => println!("{who}: {} [{url}]", message.text),
        None => println!("{who}: {}", message.text),
    }
}
