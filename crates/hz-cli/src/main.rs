//! Hoverzoom CLI
//!
//! Tools for checking rule lists and resolving URLs outside the browser.

mod driver;
mod store;

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use serde_json::json;

use hz_core::dom::{node_url, parse_selector, Document, Node};
use hz_core::url::extract_host;
use hz_core::{Config, ConfigStore, Controller, FindOptions, Hover, Point, Rect, RuleMatcher, Size};
use hz_rules::{builtin_functions, export_rules, import_rules, load_rule_set, optimize_rules, OptimizeStats};
use scraper::{ElementRef, Html};

use driver::{Driver, Report};
use store::TomlStore;

const USER_AGENT: &str = concat!("hoverzoom/", env!("CARGO_PKG_VERSION"));

#[derive(Parser)]
#[command(name = "hz-cli")]
#[command(about = "Hoverzoom rule tools and resolver")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a custom rule list
    Check {
        /// JSON rule list
        input: String,

        /// Write the optimized list here
        #[arg(short, long)]
        export: Option<String>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Resolve a URL the way a hover would
    Resolve {
        url: String,

        /// Markup of the hovered element (defaults to a plain link)
        #[arg(long)]
        html: Option<String>,

        /// URL of the page the element is on
        #[arg(long)]
        page: Option<String>,

        /// Custom rule list overriding the configured one
        #[arg(short, long)]
        rules: Option<String>,

        /// Viewport as WIDTHxHEIGHT
        #[arg(long, default_value = "1920x1080")]
        viewport: String,

        #[arg(long)]
        json: bool,
    },

    /// List which links and images of a page have rules
    Scan {
        url: String,

        /// Custom rule list overriding the configured one
        #[arg(short, long)]
        rules: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Show the configuration
    Config {
        /// Write the defaults when no config file exists
        #[arg(long)]
        init: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let store = TomlStore::new(cli.config.unwrap_or_else(TomlStore::default_path));

    let result = match cli.command {
        Commands::Check {
            input,
            export,
            verbose,
        } => cmd_check(&input, export.as_deref(), verbose),
        Commands::Resolve {
            url,
            html,
            page,
            rules,
            viewport,
            json,
        } => cmd_resolve(&store, &url, html, page, rules.as_deref(), &viewport, json),
        Commands::Scan { url, rules, json } => cmd_scan(&store, &url, rules.as_deref(), json),
        Commands::Config { init } => cmd_config(&store, init),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn cmd_check(input: &str, export: Option<&str>, verbose: bool) -> Result<(), String> {
    let start = Instant::now();
    let content = fs::read_to_string(input).map_err(|e| format!("Failed to read '{}': {}", input, e))?;

    let report = import_rules(&content, &builtin_functions());
    let mut rules = report.rules;
    let stats = optimize_rules(&mut rules);

    if verbose {
        for rule in &rules {
            println!("  ok  {}", rule.label());
        }
    }
    for diagnostic in &report.diagnostics {
        println!("  bad {}", diagnostic);
    }

    println!("Checked '{}'", input);
    for line in check_summary(&stats, report.diagnostics.len()) {
        println!("{}", line);
    }
    println!("  Time:     {:.1}ms", start.elapsed().as_secs_f64() * 1000.0);

    if let Some(path) = export {
        let json = export_rules(&rules).map_err(|e| format!("Failed to serialize rules: {}", e))?;
        fs::write(path, json).map_err(|e| format!("Failed to write '{}': {}", path, e))?;
        println!("Wrote {} rules to '{}'", rules.len(), path);
    }

    if report.diagnostics.is_empty() {
        Ok(())
    } else {
        Err(format!("{} rules rejected", report.diagnostics.len()))
    }
}

/// Counts after optimizing: duplicates and no-op rules are not "accepted".
fn check_summary(stats: &OptimizeStats, rejected: usize) -> Vec<String> {
    vec![
        format!("  Rules:    {} accepted, {} rejected", stats.after, rejected),
        format!(
            "  Optimized: {} -> {} (dedupe removed {}, no-op removed {})",
            stats.before, stats.after, stats.deduped, stats.noop_rules
        ),
    ]
}

fn load_config(store: &TomlStore) -> Result<Config, String> {
    store
        .load()
        .map_err(|e| format!("Failed to load '{}': {}", store.path().display(), e))
}

fn custom_rules(config: &Config, rules: Option<&str>) -> Result<String, String> {
    match rules {
        Some(path) => fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e)),
        None => Ok(config.custom_rules.clone()),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start runtime: {}", e))
}

fn client() -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {}", e))
}

fn cmd_resolve(
    store: &TomlStore,
    url: &str,
    html: Option<String>,
    page: Option<String>,
    rules: Option<&str>,
    viewport: &str,
    json: bool,
) -> Result<(), String> {
    let config = load_config(store)?;
    let viewport = parse_viewport(viewport)?;
    let page_url = page.unwrap_or_else(|| url.to_string());

    let loaded = load_rule_set(&custom_rules(&config, rules)?, extract_host(&page_url));
    for diagnostic in &loaded.diagnostics {
        eprintln!("warning: {}", diagnostic);
    }

    let markup = html.unwrap_or_else(|| format!(r#"<a href="{}">link</a>"#, escape_attr(url)));
    let fragment = Html::parse_fragment(&markup);
    let node = first_element(&fragment).ok_or_else(|| "HTML fragment has no element".to_string())?;

    let timeout = config.request_timeout();
    let mut controller = Controller::new(&loaded.rules, config, viewport).with_page_url(page_url.as_str());
    let effects = controller.hover(Hover {
        node: &node,
        key: 1,
        url: url.to_string(),
        anchor: Rect::new(0.0, 0.0, 120.0, 90.0),
        rendered: Size::new(120.0, 90.0),
        natural: None,
        pointer: Point::new(60.0, 45.0),
        forced: true,
    });

    if effects.is_empty() {
        if json {
            println!("{}", json!({ "matched": false, "url": url }));
        } else {
            println!("No rule matched '{}'", url);
        }
        return Ok(());
    }

    let runtime = runtime()?;
    let report = runtime.block_on(Driver::new(client()?, &mut controller, timeout).run(effects));
    print_report(url, &report, json)
}

fn print_report(url: &str, report: &Report, json: bool) -> Result<(), String> {
    if json {
        let text = serde_json::to_string_pretty(report).map_err(|e| format!("Failed to serialize report: {}", e))?;
        println!("{}", text);
        return Ok(());
    }

    println!("Resolved '{}'", url);
    println!("  Phase:    {}", report.phase);
    for request in &report.requests {
        println!("  Fetched:  {}", request);
    }
    match &report.shown {
        Some(shown) => {
            println!("  Media:    {}", shown.url);
            if let Some(caption) = &shown.caption {
                println!("  Caption:  {}", caption);
            }
            if let (Some(index), Some(count)) = (shown.gallery_index, shown.gallery_count) {
                println!(
                    "  Gallery:  {}/{}{}",
                    index + 1,
                    count,
                    shown.gallery_title.as_deref().map(|t| format!(" ({})", t)).unwrap_or_default()
                );
            }
            if let (Some(scale), Some([x, y, w, h])) = (shown.scale, shown.rect) {
                println!("  Placed:   {:.0}x{:.0} at ({:.0}, {:.0}), scale {:.2}", w, h, x, y, scale);
            }
        }
        None => println!("  Media:    (nothing shown)"),
    }
    for message in &report.messages {
        println!("  Message:  {}", message);
    }
    for line in &report.console {
        println!("  Console:  {}", line);
    }
    Ok(())
}

fn cmd_scan(store: &TomlStore, url: &str, rules: Option<&str>, json: bool) -> Result<(), String> {
    let config = load_config(store)?;
    let timeout = config.request_timeout();

    let runtime = runtime()?;
    let client = client()?;
    let (text, final_url) = runtime.block_on(async {
        let response = client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| format!("Failed to fetch '{}': {}", url, e))?;
        if !response.status().is_success() {
            return Err(format!("Failed to fetch '{}': HTTP {}", url, response.status().as_u16()));
        }
        let final_url = response.url().to_string();
        let text = response
            .text()
            .await
            .map_err(|e| format!("Failed to read '{}': {}", url, e))?;
        Ok((text, final_url))
    })?;

    let loaded = load_rule_set(&custom_rules(&config, rules)?, extract_host(&final_url));
    let doc = Document::parse(text, &final_url);
    let selector = parse_selector("a[href], img[src], video[poster]")?;
    let matcher = RuleMatcher::new(&loaded.rules);

    let mut seen = HashSet::new();
    let mut hits = Vec::new();
    let mut scanned = 0usize;
    for el in doc.select_all(&selector) {
        let Some(source) = node_url(&el).and_then(|href| doc.absolutize(href)) else {
            continue;
        };
        if !seen.insert(source.clone()) {
            continue;
        }
        scanned += 1;
        let Some(result) = matcher.find(&source, Some(&el as &dyn Node), &FindOptions::default()) else {
            continue;
        };
        let rule = loaded.rules.rule(result.rule).map(|r| r.label()).unwrap_or_default();
        let target = if result.is_suppressed() {
            None
        } else if result.needs_document() {
            Some(format!("{} (needs page)", result.url))
        } else {
            Some(result.url.clone())
        };
        hits.push((el.value().name().to_string(), source, rule, target));
    }

    if json {
        let items: Vec<_> = hits
            .iter()
            .map(|(tag, source, rule, target)| json!({ "tag": tag, "source": source, "rule": rule, "target": target }))
            .collect();
        println!("{}", json!({ "url": final_url, "scanned": scanned, "matches": items }));
        return Ok(());
    }

    println!("Scanned '{}': {} URLs, {} with rules", final_url, scanned, hits.len());
    for (tag, source, rule, target) in &hits {
        match target {
            Some(target) => println!("  <{}> {}\n      [{}] -> {}", tag, source, rule, target),
            None => println!("  <{}> {}\n      [{}] suppressed", tag, source, rule),
        }
    }
    Ok(())
}

fn cmd_config(store: &TomlStore, init: bool) -> Result<(), String> {
    if init && !store.exists() {
        store
            .save(&Config::default())
            .map_err(|e| format!("Failed to write '{}': {}", store.path().display(), e))?;
        println!("Wrote defaults to '{}'", store.path().display());
    }

    let config = load_config(store)?;
    let text = toml::to_string_pretty(&config).map_err(|e| format!("Failed to serialize config: {}", e))?;
    println!("# {}", store.path().display());
    print!("{}", text);
    Ok(())
}

/// `1280x720` -> size.
fn parse_viewport(s: &str) -> Result<Size, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("Invalid viewport '{}', expected WIDTHxHEIGHT", s))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<f64>()
            .ok()
            .filter(|n| *n > 0.0)
            .ok_or_else(|| format!("Invalid viewport '{}', expected WIDTHxHEIGHT", s))
    };
    Ok(Size::new(parse(w)?, parse(h)?))
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;").replace('<', "&lt;")
}

/// First real element of a parsed fragment (skipping the synthetic root).
fn first_element(fragment: &Html) -> Option<ElementRef<'_>> {
    fragment.root_element().descendants().skip(1).find_map(ElementRef::wrap)
}
