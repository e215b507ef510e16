use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use storewatch_core::{
    find_cascade, recognize, DetectParams, DotMatcher, FaceRect, Fingerprint,
    HaarCascade, Presence,
};
use storewatch_hw::Camera;
use storewatch_store::{
    format_time, parse_time, CustomerEdit, CustomerSummary, NewProduct, PastRecord, Product,
    ProductUpdate, Registration, Store, StoreError,
};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod studio;

use config::Config;
use engine::{detect_faces_rgb, spawn_engine, DetectedFace};

/// Scans tried before a one-shot camera command gives up.
const CAMERA_ATTEMPTS: usize = 10;

#[derive(Parser)]
#[command(
    name = "storewatch",
    version,
    about = "Face-recognition customer check-in for a jewellery shop"
)]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/storewatch/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file, overriding the configured one
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
#[group(required = true, multiple = false)]
struct FaceSource {
    /// Read the face from an image file
    #[arg(long, value_name = "FILE")]
    image: Option<PathBuf>,
    /// Capture the face from the camera
    #[arg(long)]
    camera: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Shop(ShopCommand),
    /// Hosted image analysis and regeneration
    Studio {
        #[command(subcommand)]
        command: StudioCommand,
    },
    /// List V4L2 capture devices
    Cameras,
}

/// Commands that work on the shop database.
#[derive(Subcommand)]
enum ShopCommand {
    /// Create the database and seed the sample inventory
    Init {
        /// Directory holding jewel1.jpg .. jewel10.jpg
        #[arg(long, value_name = "DIR")]
        seed_images: Option<PathBuf>,
    },
    /// List customers with their latest visit
    Customers,
    /// Register a face under a name and check the customer in
    Register {
        name: String,
        #[command(flatten)]
        source: FaceSource,
    },
    /// Check a customer in by id, or by recognizing their face
    CheckIn {
        #[arg(required_unless_present_any = ["image", "camera"], conflicts_with_all = ["image", "camera"])]
        id: Option<i64>,
        /// Recognize the face in an image file
        #[arg(long, value_name = "FILE", conflicts_with = "camera")]
        image: Option<PathBuf>,
        /// Recognize the face in front of the camera
        #[arg(long)]
        camera: bool,
    },
    /// Check a customer out, optionally recording a purchase
    CheckOut {
        id: i64,
        /// Product bought on the way out
        #[arg(long, value_name = "PRODUCT_ID")]
        product: Option<String>,
    },
    /// Rename a customer or correct their latest visit
    Edit {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        /// Entry time, "YYYY-MM-DD HH:MM:SS"
        #[arg(long)]
        entry: Option<String>,
        /// Exit time, "YYYY-MM-DD HH:MM:SS", or "open" to reopen the visit
        #[arg(long)]
        exit: Option<String>,
        #[arg(long)]
        visit_number: Option<i64>,
    },
    /// Delete a customer with all visits and purchases
    Delete { id: i64 },
    /// Show a customer's visits and purchases
    History { id: i64 },
    /// Detect and label every face in an image or camera frame
    Identify {
        #[command(flatten)]
        source: FaceSource,
    },
    /// Watch the camera and report who is in front of it
    Watch {
        /// Check in returning customers as soon as they are recognized
        #[arg(long)]
        auto_check_in: bool,
    },
    /// Manage the product inventory
    Inventory {
        #[command(subcommand)]
        command: InventoryCommand,
    },
    /// Write a purchase's product image to a file and print the studio URL
    ExportImage {
        purchase_id: i64,
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum InventoryCommand {
    /// List all products
    List {
        /// Only products still in stock
        #[arg(long)]
        available: bool,
    },
    /// Show one product
    Show {
        product_id: String,
        /// Also write the product image to this file
        #[arg(long, value_name = "FILE")]
        image_out: Option<PathBuf>,
    },
    /// Add a product
    Add {
        product_id: String,
        name: String,
        price: f64,
        quantity: i64,
        #[arg(long, value_name = "FILE")]
        image: Option<PathBuf>,
    },
    /// Change fields of a product
    Update {
        product_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        price: Option<f64>,
        #[arg(long)]
        quantity: Option<i64>,
        #[arg(long, value_name = "FILE")]
        image: Option<PathBuf>,
    },
    /// Remove a product
    Remove { product_id: String },
    /// Insert the sample jewels into an empty inventory
    Seed {
        #[arg(long, value_name = "DIR")]
        images: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum StudioCommand {
    /// Describe an image with Gemini and render a new one from the description
    Analyze {
        image: PathBuf,
        /// Where to save the generated image (default: <IMAGE>-generated.png)
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(db) = cli.db {
        cfg.db_path = db;
    }
    let json = cli.json;

    match cli.command {
        Commands::Cameras => list_cameras(json),
        Commands::Studio { command } => studio(&cfg, command).await,
        Commands::Shop(command) => {
            let store = Store::open(&cfg.db_path)
                .with_context(|| format!("opening {}", cfg.db_path.display()))?;
            run(&cfg, &store, command, json).await
        }
    }
}

async fn run(cfg: &Config, store: &Store, command: ShopCommand, json: bool) -> Result<()> {
    match command {
        ShopCommand::Init { seed_images } => {
            let seeded = store.seed_inventory(seed_images.as_deref())?;
            println!("Database ready at {}", cfg.db_path.display());
            if seeded > 0 {
                println!("Seeded {seeded} inventory items");
            }
        }
        ShopCommand::Customers => print_customers(&store.customers()?, json)?,
        ShopCommand::Register { name, source } => {
            let fingerprint = face_from_source(cfg, &source).await?;
            match store.register(&name, &fingerprint)? {
                Registration::New { customer_id, visit } => println!(
                    "Registered {name} (id {customer_id}); checked in at {}",
                    format_time(&visit.entry_time)
                ),
                Registration::Returning { customer_id, visit } => println!(
                    "Welcome back {name} (id {customer_id}); visit #{} started at {}",
                    visit.visit_number,
                    format_time(&visit.entry_time)
                ),
                Registration::AlreadyInStore { customer_id } => {
                    println!("{name} (id {customer_id}) is already in the store")
                }
            }
        }
        ShopCommand::CheckIn { id, image, camera } => {
            let customer_id = match id {
                Some(id) => id,
                None => {
                    let source = FaceSource { image, camera };
                    let fingerprint = face_from_source(cfg, &source).await?;
                    let gallery = store.gallery()?;
                    let (presence, result) =
                        recognize(&fingerprint, &gallery, &DotMatcher, cfg.match_threshold);
                    tracing::info!(similarity = result.similarity, label = %presence.label(), "recognized");
                    match presence {
                        Presence::Unknown => bail!(
                            "face not recognized (best similarity {:.3}); register it with `storewatch register NAME`",
                            result.similarity
                        ),
                        Presence::CheckedIn { name, .. } => {
                            println!("{name} is already checked in");
                            return Ok(());
                        }
                        Presence::Away { customer_id, .. } => customer_id,
                    }
                }
            };
            match store.check_in(customer_id) {
                Ok(visit) => {
                    let name = store.customer(customer_id)?.name;
                    println!(
                        "Checked in {name}: visit #{} at {}",
                        visit.visit_number,
                        format_time(&visit.entry_time)
                    );
                }
                Err(StoreError::AlreadyCheckedIn { name, .. }) => {
                    println!("{name} is already checked in")
                }
                Err(e) => return Err(e.into()),
            }
        }
        ShopCommand::CheckOut { id, product } => {
            let out = store.check_out(id, product.as_deref())?;
            let name = store.customer(id)?.name;
            if json {
                print_json(&out)?;
            } else {
                println!(
                    "Checked out {name} at {}",
                    out.visit.exit_time.as_ref().map(format_time).unwrap_or_default()
                );
                if let Some(p) = &out.purchase {
                    println!(
                        "Purchase #{}: {} {} (${:.2})",
                        p.purchase_id, p.product_id, p.product_name, p.product_price
                    );
                }
            }
        }
        ShopCommand::Edit {
            id,
            name,
            entry,
            exit,
            visit_number,
        } => {
            let exit_time = match exit.as_deref().map(str::trim) {
                None => None,
                Some("open") => Some(None),
                Some(t) => Some(Some(parse_time(t)?)),
            };
            let edit = CustomerEdit {
                name,
                entry_time: entry.as_deref().map(parse_time).transpose()?,
                exit_time,
                visit_number,
            };
            store.edit_customer(id, &edit)?;
            println!("Updated customer {id}");
        }
        ShopCommand::Delete { id } => {
            let name = store.customer(id)?.name;
            store.delete_customer(id)?;
            println!("Deleted {name} and all their records");
        }
        ShopCommand::History { id } => {
            let name = store.customer(id)?.name;
            print_history(&name, &store.past_records(id)?, json)?;
        }
        ShopCommand::Identify { source } => identify(cfg, store, &source, json).await?,
        ShopCommand::Watch { auto_check_in } => watch(cfg, store, auto_check_in).await?,
        ShopCommand::Inventory { command } => inventory(store, command, json)?,
        ShopCommand::ExportImage { purchase_id, out } => {
            let Some(bytes) = store.purchase_image(purchase_id)? else {
                bail!("purchase {purchase_id} has no product image");
            };
            let path = match out {
                Some(path) => {
                    std::fs::write(&path, &bytes)
                        .with_context(|| format!("writing {}", path.display()))?;
                    path
                }
                None => {
                    let file = tempfile::Builder::new()
                        .prefix("storewatch-")
                        .suffix(".jpg")
                        .tempfile()?;
                    std::fs::write(file.path(), &bytes)?;
                    let (_, path) = file.keep().context("keeping exported image")?;
                    path
                }
            };
            println!("Saved product image to {}", path.display());
            println!("Open the image studio at {}", cfg.studio_url);
        }
    }
    Ok(())
}

// --- faces ---

fn load_cascade(cfg: &Config) -> Result<HaarCascade> {
    let path = find_cascade(cfg.cascade_path.as_deref())?;
    let cascade = HaarCascade::load(&path)
        .with_context(|| format!("loading cascade {}", path.display()))?;
    tracing::info!(path = %path.display(), stages = cascade.stage_count(), "cascade loaded");
    Ok(cascade)
}

fn load_rgb(path: &Path) -> Result<image::RgbImage> {
    let img = image::open(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(img.to_rgb8())
}

/// The largest face that produced a fingerprint.
fn best_face(faces: &[DetectedFace]) -> Option<(FaceRect, &Fingerprint)> {
    faces
        .iter()
        .filter_map(|f| f.fingerprint.as_ref().map(|fp| (f.rect, fp)))
        .max_by_key(|(rect, _)| rect.area())
}

/// Detect faces in the source: a file, or camera frames until one shows a face.
async fn detect_from_source(cfg: &Config, source: &FaceSource) -> Result<Vec<DetectedFace>> {
    let cascade = load_cascade(cfg)?;
    let params = DetectParams::default();

    if let Some(path) = &source.image {
        return Ok(detect_faces_rgb(&cascade, &load_rgb(path)?, &params));
    }

    let engine = spawn_engine(
        &cfg.camera_device,
        cfg.frame_width,
        cfg.frame_height,
        cascade,
        params,
        cfg.warmup_frames,
    )?;
    for attempt in 1..=CAMERA_ATTEMPTS {
        let scan = engine.scan().await?;
        if scan.faces.iter().any(|f| f.fingerprint.is_some()) {
            return Ok(scan.faces);
        }
        tracing::debug!(attempt, dark = scan.dark, "no usable face in frame");
    }
    Ok(Vec::new())
}

async fn face_from_source(cfg: &Config, source: &FaceSource) -> Result<Fingerprint> {
    let faces = detect_from_source(cfg, source).await?;
    match best_face(&faces) {
        Some((rect, fp)) => {
            if faces.len() > 1 {
                tracing::info!(count = faces.len(), ?rect, "several faces found; using the largest");
            }
            Ok(fp.clone())
        }
        None => bail!("no face detected"),
    }
}

#[derive(Serialize)]
struct Identified {
    #[serde(rename = "box")]
    rect: FaceRect,
    label: String,
    similarity: Option<f64>,
    presence: Option<Presence>,
}

async fn identify(cfg: &Config, store: &Store, source: &FaceSource, json: bool) -> Result<()> {
    let faces = detect_from_source(cfg, source).await?;
    let gallery = store.gallery()?;

    let rows: Vec<Identified> = faces
        .into_iter()
        .map(|face| match &face.fingerprint {
            Some(fp) => {
                let (presence, result) = recognize(fp, &gallery, &DotMatcher, cfg.match_threshold);
                Identified {
                    rect: face.rect,
                    label: presence.label(),
                    similarity: Some(result.similarity),
                    presence: Some(presence),
                }
            }
            None => Identified {
                rect: face.rect,
                label: "Unreadable face".to_string(),
                similarity: None,
                presence: None,
            },
        })
        .collect();

    if json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("No faces detected");
    }
    for row in &rows {
        let sim = row
            .similarity
            .map(|s| format!("{s:.3}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "[{},{} {}x{}] {} (similarity {sim})",
            row.rect.x, row.rect.y, row.rect.width, row.rect.height, row.label
        );
    }
    Ok(())
}

async fn watch(cfg: &Config, store: &Store, auto_check_in: bool) -> Result<()> {
    let engine = spawn_engine(
        &cfg.camera_device,
        cfg.frame_width,
        cfg.frame_height,
        load_cascade(cfg)?,
        DetectParams::default(),
        cfg.warmup_frames,
    )?;

    let mut ticker = tokio::time::interval(Duration::from_millis(cfg.scan_interval_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    println!("Watching {} (Ctrl-C to stop)", cfg.camera_device);
    let mut last_labels: Vec<String> = Vec::new();

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("stopping watch");
                break;
            }
            _ = ticker.tick() => {
                let scan = match engine.scan().await {
                    Ok(scan) => scan,
                    Err(e) => {
                        tracing::warn!(error = %e, "scan failed");
                        continue;
                    }
                };
                if scan.dark {
                    continue;
                }

                let mut labels = match label_faces(store, &scan.faces, cfg.match_threshold, auto_check_in) {
                    Ok(labels) => labels,
                    Err(e) => {
                        tracing::warn!(error = %e, "labelling faces failed");
                        continue;
                    }
                };
                labels.sort();
                if labels != last_labels {
                    if labels.is_empty() {
                        println!("(nobody)");
                    } else {
                        println!("{}", labels.join(" | "));
                    }
                    last_labels = labels;
                }
            }
        }
    }
    Ok(())
}

/// Label each fingerprinted face, checking in recognized customers who are
/// away when `auto_check_in` is set.
fn label_faces(
    store: &Store,
    faces: &[DetectedFace],
    threshold: f64,
    auto_check_in: bool,
) -> Result<Vec<String>, StoreError> {
    let gallery = store.gallery()?;
    let mut labels = Vec::new();
    for face in faces {
        let Some(fp) = &face.fingerprint else { continue };
        let (presence, result) = recognize(fp, &gallery, &DotMatcher, threshold);
        tracing::debug!(rect = ?face.rect, similarity = result.similarity, "face");

        if let (true, Presence::Away { customer_id, name }) = (auto_check_in, &presence) {
            match store.check_in(*customer_id) {
                Ok(visit) => {
                    println!("Checked in {name}: visit #{}", visit.visit_number);
                    labels.push(format!("Checked-in: {name}"));
                    continue;
                }
                Err(e) => tracing::warn!(customer_id, error = %e, "auto check-in failed"),
            }
        }
        labels.push(presence.label());
    }
    Ok(labels)
}

// --- inventory ---

fn inventory(store: &Store, command: InventoryCommand, json: bool) -> Result<()> {
    match command {
        InventoryCommand::List { available } => {
            let products = if available {
                store.available_products()?
            } else {
                store.inventory()?
            };
            print_products(&products, json)?;
        }
        InventoryCommand::Show { product_id, image_out } => {
            print_products(&[store.product(&product_id)?], json)?;
            if let Some(path) = image_out {
                let Some(bytes) = store.product_image(&product_id)? else {
                    bail!("{product_id} has no image");
                };
                std::fs::write(&path, &bytes)
                    .with_context(|| format!("writing {}", path.display()))?;
                if !json {
                    println!("Saved image to {}", path.display());
                }
            }
        }
        InventoryCommand::Add {
            product_id,
            name,
            price,
            quantity,
            image,
        } => {
            let product = store.add_product(&NewProduct {
                product_id,
                product_name: name,
                price,
                quantity,
                image: read_optional(image.as_deref())?,
            })?;
            println!("Added {} {}", product.product_id, product.product_name);
        }
        InventoryCommand::Update {
            product_id,
            name,
            price,
            quantity,
            image,
        } => {
            let product = store.update_product(
                &product_id,
                &ProductUpdate {
                    product_name: name,
                    price,
                    quantity,
                    image: read_optional(image.as_deref())?,
                },
            )?;
            print_products(&[product], json)?;
        }
        InventoryCommand::Remove { product_id } => {
            store.remove_product(&product_id)?;
            println!("Removed {product_id}");
        }
        InventoryCommand::Seed { images } => {
            let n = store.seed_inventory(images.as_deref())?;
            if n == 0 {
                println!("Inventory already has products; nothing seeded");
            } else {
                println!("Seeded {n} products");
            }
        }
    }
    Ok(())
}

fn read_optional(path: Option<&Path>) -> Result<Option<Vec<u8>>> {
    path.map(|p| std::fs::read(p).with_context(|| format!("reading {}", p.display())))
        .transpose()
}

// --- studio ---

async fn studio(cfg: &Config, command: StudioCommand) -> Result<()> {
    match command {
        StudioCommand::Analyze { image, out } => studio_analyze(cfg, &image, out).await,
    }
}

async fn studio_analyze(cfg: &Config, image_path: &Path, out: Option<PathBuf>) -> Result<()> {
    let source = image::open(image_path)
        .with_context(|| format!("reading {}", image_path.display()))?;
    let studio = studio::Studio::from_env(cfg)?;

    let analysis = studio.analyze(&source).await?;
    println!("{analysis}");

    let generated = studio.generate(&analysis).await?;
    let out = out.unwrap_or_else(|| {
        let stem = image_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        image_path.with_file_name(format!("{stem}-generated.png"))
    });
    image::load_from_memory(&generated)
        .context("decoding generated image")?
        .save(&out)
        .with_context(|| format!("writing {}", out.display()))?;
    println!("Generated image saved to {}", out.display());
    Ok(())
}

// --- output ---

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_customers(customers: &[CustomerSummary], json: bool) -> Result<()> {
    if json {
        return print_json(customers);
    }
    if customers.is_empty() {
        println!("No customers registered");
        return Ok(());
    }
    println!(
        "{:>4}  {:<24} {:<19}  {:<19}  {:>7}  {}",
        "ID", "Name", "Entry Time", "Exit Time", "Visit #", "Status"
    );
    for c in customers {
        let (entry, exit, number) = match &c.latest_visit {
            Some(v) => (
                format_time(&v.entry_time),
                v.exit_time.as_ref().map(format_time).unwrap_or_else(|| "-".into()),
                v.visit_number.to_string(),
            ),
            None => ("-".into(), "-".into(), "-".into()),
        };
        println!(
            "{:>4}  {:<24} {:<19}  {:<19}  {:>7}  {}",
            c.customer_id, c.name, entry, exit, number, c.status
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct HistoryRow<'a> {
    #[serde(flatten)]
    record: &'a PastRecord,
    duration: String,
}

fn print_history(name: &str, records: &[PastRecord], json: bool) -> Result<()> {
    if json {
        let rows: Vec<_> = records
            .iter()
            .map(|record| HistoryRow { record, duration: record.duration_label() })
            .collect();
        return print_json(&rows);
    }

    println!("Visit history for {name}");
    if records.is_empty() {
        println!("No records found");
        return Ok(());
    }
    let display = "%Y-%m-%d %I:%M %p";
    println!(
        "{:>7}  {:<19} {:<19} {:<14} {:<8} {:<20} {:>10}  {}",
        "Visit #", "Entry Time", "Exit Time", "Duration", "Product", "Name", "Price", "Image"
    );
    for r in records {
        let exit = r
            .exit_time
            .map(|t| t.format(display).to_string())
            .unwrap_or_else(|| "-".into());
        let (pid, pname, price, image) = match &r.purchase {
            Some(p) => (
                p.product_id.clone(),
                p.product_name.clone(),
                format!("${:.2}", p.product_price),
                if p.has_image {
                    format!("purchase {}", p.purchase_id)
                } else {
                    "-".into()
                },
            ),
            None => ("-".into(), "-".into(), "-".into(), "-".into()),
        };
        println!(
            "{:>7}  {:<19} {:<19} {:<14} {:<8} {:<20} {:>10}  {}",
            r.visit_number,
            r.entry_time.format(display).to_string(),
            exit,
            r.duration_label(),
            pid,
            pname,
            price,
            image
        );
    }
    Ok(())
}

fn print_products(products: &[Product], json: bool) -> Result<()> {
    if json {
        return print_json(products);
    }
    println!(
        "{:<8} {:<20} {:>10} {:>5}  {}",
        "ID", "Name", "Price", "Qty", "Image"
    );
    for p in products {
        let image = p
            .image_size
            .map(|n| format!("{n} bytes"))
            .unwrap_or_else(|| "None".into());
        println!(
            "{:<8} {:<20} {:>10} {:>5}  {}",
            p.product_id,
            p.product_name,
            format!("${:.2}", p.price),
            p.quantity,
            image
        );
    }
    Ok(())
}

fn list_cameras(json: bool) -> Result<()> {
    let devices = Camera::list_devices();
    if json {
        let rows: Vec<_> = devices
            .iter()
            .map(|d| serde_json::json!({ "path": d.path, "name": d.name, "driver": d.driver, "bus": d.bus }))
            .collect();
        return print_json(&rows);
    }
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for d in devices {
        println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }
    Ok(())
}
