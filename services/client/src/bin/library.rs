//! services/client/src/bin/library.rs

use bytes::Bytes;
use clap::{Parser, Subcommand};
use client_lib::{
    adapters::{ConsoleNavigator, ConsoleNotifier, FileStorage, ReqwestTransport},
    config::Config,
    error::ClientError,
    Library, LibraryPorts,
};
use library_core::{
    Book, BookDraft, BookFilter, BookId, BookPatch, CategoryDraft, CategoryId, FileUpload, Gender,
    PasswordChange, ProfilePatch, Registration, ResourceKind, Role, UserId,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "library", about = "Command line client of the digital library", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and remember the session.
    Login {
        username: String,
        #[arg(long, env = "LIBRARY_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the session.
    Logout,
    /// Create an account. Does not log in.
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "LIBRARY_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        full_name: String,
        #[arg(long, default_value = "other")]
        gender: String,
        #[arg(long, default_value = "reader")]
        role: String,
    },
    /// Show the logged-in user.
    Whoami,
    Books {
        #[command(subcommand)]
        action: BookAction,
    },
    Categories {
        #[command(subcommand)]
        action: CategoryAction,
    },
    Bookmarks {
        #[command(subcommand)]
        action: BookmarkAction,
    },
    Users {
        #[command(subcommand)]
        action: UserAction,
    },
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// Show the admin dashboard counts.
    Dashboard,
}

#[derive(Subcommand)]
enum BookAction {
    List {
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
    },
    Search {
        query: String,
        #[arg(long)]
        category: Option<String>,
    },
    Show {
        id: i64,
    },
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        author: String,
        #[arg(long)]
        category_id: i64,
        #[arg(long, default_value = "")]
        description: String,
        /// The PDF to upload.
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        cover: Option<PathBuf>,
    },
    Update {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        category_id: Option<i64>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        cover: Option<PathBuf>,
    },
    Delete {
        id: i64,
    },
    /// Save the book file into a directory.
    Download {
        id: i64,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Save the cover image.
    Cover {
        id: i64,
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum CategoryAction {
    List,
    /// List the books of a category.
    Books { name: String },
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    Update {
        id: i64,
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum BookmarkAction {
    List,
    Add { book_id: i64 },
    Remove { book_id: i64 },
    Toggle { book_id: i64 },
}

#[derive(Subcommand)]
enum UserAction {
    List,
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Show a profile; the own one without an id.
    Show { id: Option<i64> },
    Update {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long)]
        gender: Option<String>,
        #[arg(long)]
        contact_number: Option<String>,
        #[arg(long)]
        address: Option<String>,
    },
    Password {
        #[arg(long)]
        current: String,
        #[arg(long)]
        new: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let cli = Cli::parse();
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    info!(api = %config.api_base_url, "Configuration loaded");

    // --- 2. Initialize the Adapters ---
    let transport = ReqwestTransport::new(config.api_base_url.clone(), config.request_timeout)?;
    let ports = LibraryPorts {
        transport: Arc::new(transport),
        storage: Arc::new(FileStorage::new(config.session_path.clone())),
        navigator: Arc::new(ConsoleNavigator),
        notifier: Arc::new(ConsoleNotifier),
    };
    let library = Library::new(config, ports);

    // --- 3. Run the Command ---
    match cli.command {
        Command::Login { username, password } => {
            if !library.login(&username, &password).await {
                return Err(ClientError::Internal("login failed".to_string()));
            }
        }
        Command::Logout => library.logout(),
        Command::Register {
            username,
            email,
            password,
            full_name,
            gender,
            role,
        } => {
            let registration = Registration {
                username,
                email,
                password,
                full_name,
                gender: parse_gender(&gender)?,
                role: Role::parse(&role),
            };
            if !library.register(&registration).await {
                return Err(ClientError::Internal("registration failed".to_string()));
            }
        }
        Command::Whoami => match library.current_user() {
            Some(user) => println!("{} <{}> ({})", user.username, user.email, user.role.as_str()),
            None => println!("Not logged in."),
        },
        Command::Books { action } => books(&library, action).await?,
        Command::Categories { action } => categories(&library, action).await?,
        Command::Bookmarks { action } => bookmarks(&library, action).await?,
        Command::Users { action } => match action {
            UserAction::List => {
                for user in library.users().await?.iter() {
                    println!(
                        "{:>5}  {:<20}  {:<30}  {}",
                        user.id,
                        user.username,
                        user.email,
                        user.role.as_str()
                    );
                }
            }
            UserAction::Delete { id } => library.delete_user(UserId(id)).await?,
        },
        Command::Profile { action } => profile(&library, action).await?,
        Command::Dashboard => {
            let stats = library.dashboard_stats().await?;
            println!("Users:      {}", stats.users);
            println!("Readers:    {}", stats.readers);
            println!("Books:      {}", stats.books);
            println!("Categories: {}", stats.categories);
        }
    }

    Ok(())
}

async fn books(library: &Library, action: BookAction) -> Result<(), ClientError> {
    match action {
        BookAction::List { page, limit } => {
            let filter = match page {
                Some(page) => BookFilter::page(page, limit.unwrap_or(library.config().page_size)),
                None => BookFilter::default(),
            };
            print_books(&library.books(&filter).await?);
        }
        BookAction::Search { query, category } => {
            print_books(&library.books(&BookFilter::search(query, category)).await?);
        }
        BookAction::Show { id } => {
            let book = library.book(BookId(id)).await?;
            println!("{} by {}", book.title, book.author);
            if let Some(name) = &book.category.name {
                println!("Category:  {}", name);
            }
            if let Some(created) = book.created_at {
                println!("Added:     {}", created.format("%Y-%m-%d"));
            }
            println!("Cover:     {}", if book.cover.is_some() { "yes" } else { "no" });
            println!("File:      {}", if book.content.is_some() { "yes" } else { "no" });
            if !book.description.is_empty() {
                println!("\n{}", book.description);
            }
        }
        BookAction::Create {
            title,
            author,
            category_id,
            description,
            file,
            cover,
        } => {
            let draft = BookDraft {
                title,
                author,
                category_id: CategoryId(category_id),
                description,
                book_file: upload(file.as_deref()).await?,
                cover_image: upload(cover.as_deref()).await?,
            };
            if let Some(book) = library.create_book(&draft).await? {
                println!("Created book {}", book.id);
            }
        }
        BookAction::Update {
            id,
            title,
            author,
            category_id,
            description,
            file,
            cover,
        } => {
            let patch = BookPatch {
                title,
                author,
                category_id: category_id.map(CategoryId),
                description,
                book_file: upload(file.as_deref()).await?,
                cover_image: upload(cover.as_deref()).await?,
            };
            library.update_book(BookId(id), &patch).await?;
        }
        BookAction::Delete { id } => library.delete_book(BookId(id)).await?,
        BookAction::Download { id, out } => {
            let download = library.download_book(BookId(id)).await?;
            let target = out.join(&download.file_name);
            tokio::fs::write(&target, &download.bytes).await?;
            println!("Saved {} ({} bytes)", target.display(), download.bytes.len());
        }
        BookAction::Cover { id, out } => {
            let scope = library.resource_scope();
            let handle = scope.acquire(BookId(id), ResourceKind::Cover).await?;
            match library.resources().registry().resolve(&handle.url) {
                Some(blob) => {
                    tokio::fs::write(&out, &blob.bytes).await?;
                    println!("Saved {} ({})", out.display(), blob.content_type);
                }
                None => println!("No cover available, placeholder is {}", handle.url),
            }
            scope.close();
        }
    }
    Ok(())
}

async fn categories(library: &Library, action: CategoryAction) -> Result<(), ClientError> {
    match action {
        CategoryAction::List => {
            for category in library.categories().await?.iter() {
                println!(
                    "{:>5}  {:<25}  {}",
                    category.id,
                    category.category_name,
                    category.description.as_deref().unwrap_or("")
                );
            }
        }
        CategoryAction::Books { name } => print_books(&library.category_books(&name).await?),
        CategoryAction::Create { name, description } => {
            let draft = CategoryDraft {
                category_name: name,
                description,
            };
            if let Some(category) = library.create_category(&draft).await? {
                println!("Created category {}", category.id);
            }
        }
        CategoryAction::Update { id, name, description } => {
            let draft = CategoryDraft {
                category_name: name,
                description,
            };
            library.update_category(CategoryId(id), &draft).await?;
        }
        CategoryAction::Delete { id } => library.delete_category(CategoryId(id)).await?,
    }
    Ok(())
}

async fn bookmarks(library: &Library, action: BookmarkAction) -> Result<(), ClientError> {
    let outcome = match action {
        BookmarkAction::List => {
            print_books(&library.bookmarks().await?);
            return Ok(());
        }
        BookmarkAction::Add { book_id } => library.add_bookmark(BookId(book_id)).await?,
        BookmarkAction::Remove { book_id } => library.remove_bookmark(BookId(book_id)).await?,
        BookmarkAction::Toggle { book_id } => library.toggle_bookmark(BookId(book_id)).await?,
    };
    println!("{:?}", outcome);
    Ok(())
}

async fn profile(library: &Library, action: ProfileAction) -> Result<(), ClientError> {
    let me = library.current_user();
    match action {
        ProfileAction::Show { id } => {
            let id = match (id, &me) {
                (Some(id), _) => UserId(id),
                (None, Some(user)) => user.id,
                (None, None) => return Err(ClientError::Internal("not logged in".to_string())),
            };
            let user = library.profile(id).await?;
            println!("Username:  {}", user.username);
            println!("Name:      {}", user.full_name);
            println!("Email:     {}", user.email);
            println!("Role:      {}", user.role.as_str());
            if let Some(gender) = user.gender {
                println!("Gender:    {}", gender.as_str());
            }
            if let Some(contact) = &user.contact_number {
                println!("Contact:   {}", contact);
            }
            if let Some(address) = &user.address {
                println!("Address:   {}", address);
            }
        }
        ProfileAction::Update {
            username,
            email,
            full_name,
            gender,
            contact_number,
            address,
        } => {
            let me = me.ok_or_else(|| ClientError::Internal("not logged in".to_string()))?;
            let patch = ProfilePatch {
                username,
                email,
                full_name,
                gender: gender.as_deref().map(parse_gender).transpose()?,
                contact_number,
                address,
            };
            if !library.update_profile(me.id, &patch).await {
                return Err(ClientError::Internal("profile update failed".to_string()));
            }
        }
        ProfileAction::Password { current, new } => {
            let change = PasswordChange {
                current_password: current,
                new_password: new,
            };
            if !library.change_password(&change).await {
                return Err(ClientError::Internal("password change failed".to_string()));
            }
        }
    }
    Ok(())
}

fn print_books(books: &[Book]) {
    if books.is_empty() {
        println!("No books found.");
        return;
    }
    for book in books {
        println!(
            "{:>5}  {:<40}  {:<25}  {}",
            book.id,
            book.title,
            book.author,
            book.category.name.as_deref().unwrap_or("")
        );
    }
}

fn parse_gender(value: &str) -> Result<Gender, ClientError> {
    Gender::parse(value).ok_or_else(|| ClientError::Internal(format!("unknown gender '{}'", value)))
}

async fn upload(path: Option<&Path>) -> Result<Option<FileUpload>, ClientError> {
    let Some(path) = path else {
        return Ok(None);
    };
    let bytes = tokio::fs::read(path).await?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let content_type = match extension.as_str() {
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    };
    Ok(Some(FileUpload {
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string()),
        content_type: content_type.to_string(),
        bytes: Bytes::from(bytes),
    }))
}
