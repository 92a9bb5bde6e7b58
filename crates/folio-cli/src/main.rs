//! Folio command-line tool.
//!
//! Works directly on a local outline database.
//!
//! Usage:
//!   folio init
//!   folio doc new "Reading list"
//!   folio add Reading --title "Papers"
//!   folio add Reading --parent 01a3 --url https://example.com
//!   folio mv Reading 01a3 01b7 --group Later --before 01c2
//!   folio tree Reading

mod tree;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use folio_kernel::{
    AllowAll, Folio, FolioConfig, GroupFilter, WriteScope, ensure_write, parse_content_type,
    parse_style_type,
};
use folio_types::{
    Block, BlockContent, BlockId, DocumentId, GroupId, MoveRequest, NewBlock, NewReference,
    PrincipalId, Reference, ReferenceInput, Scope, resolve_prefix,
};

/// Nested ordered outlines on a local database.
#[derive(Parser, Debug)]
#[command(name = "folio")]
#[command(about = "Nested ordered outlines")]
struct Cli {
    /// Config file (RON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default config file and create the database
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Manage documents
    #[command(subcommand)]
    Doc(DocCommand),
    /// Manage groups
    #[command(subcommand)]
    Group(GroupCommand),
    /// Create a block
    Add(AddArgs),
    /// Replace the content of a block
    Edit(EditArgs),
    /// Move blocks, optionally into another group or parent
    Mv {
        document: String,
        /// Blocks to move, in the order they should land
        #[arg(required = true)]
        blocks: Vec<String>,
        /// Target group (omit for document level)
        #[arg(long)]
        group: Option<String>,
        /// Target parent block
        #[arg(long)]
        parent: Option<String>,
        /// Land before this sibling instead of at the end
        #[arg(long)]
        before: Option<String>,
    },
    /// Delete a block and its subtree
    Rm { document: String, block: String },
    /// Print the outline
    Tree {
        document: String,
        /// Only blocks in this group
        #[arg(long, conflicts_with = "document_only")]
        group: Option<String>,
        /// Only document-level blocks
        #[arg(long)]
        document_only: bool,
        /// Deepest level to print (0 = roots only)
        #[arg(long)]
        depth: Option<usize>,
        /// Emit nested JSON instead of a tree
        #[arg(long)]
        json: bool,
    },
    /// Report structural problems in a document
    Check { document: String },
}

#[derive(Subcommand, Debug)]
enum DocCommand {
    /// Create a document
    New {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// List documents
    Ls,
    /// Delete a document and everything in it
    Rm { document: String },
}

#[derive(Subcommand, Debug)]
enum GroupCommand {
    /// Create a group
    New {
        document: String,
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// List groups of a document
    Ls { document: String },
    /// Delete a group and the blocks inside it
    Rm { document: String, group: String },
}

#[derive(Args, Debug)]
struct ContentArgs {
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    body: Option<String>,
    /// bullet, numbered or none
    #[arg(long)]
    style: Option<String>,
    /// text, markdown or html
    #[arg(long)]
    content_type: Option<String>,
    /// Reference a new URL
    #[arg(long, conflicts_with = "link_group")]
    url: Option<String>,
    /// Reference a new group with this name
    #[arg(long)]
    link_group: Option<String>,
}

#[derive(Args, Debug)]
struct AddArgs {
    document: String,
    #[command(flatten)]
    content: ContentArgs,
    /// Group to create the block in
    #[arg(long)]
    group: Option<String>,
    /// Parent block
    #[arg(long)]
    parent: Option<String>,
    /// Insert before this sibling instead of appending
    #[arg(long)]
    before: Option<String>,
}

#[derive(Args, Debug)]
struct EditArgs {
    document: String,
    block: String,
    #[command(flatten)]
    content: ContentArgs,
    /// Drop the block's reference
    #[arg(long, conflicts_with_all = ["url", "link_group"])]
    clear_ref: bool,
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(FolioConfig::default_path);
    let mut config = FolioConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }

    tracing::debug!(config = %config_path.display(), db = %config.database.path.display(), "starting");

    match cli.command {
        Command::Init { force } => init(&config_path, &config, force),
        command => {
            let folio = Folio::open(&config)
                .with_context(|| format!("opening {}", config.database.path.display()))?;
            Session { folio }.run(command)
        }
    }
}

fn init(config_path: &std::path::Path, config: &FolioConfig, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        println!("config already at {}", config_path.display());
    } else {
        if let Some(dir) = config_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let text = ron::ser::to_string_pretty(config, ron::ser::PrettyConfig::default())?;
        std::fs::write(config_path, text)?;
        println!("wrote {}", config_path.display());
    }
    Folio::open(config)?;
    println!("database at {}", config.database.path.display());
    Ok(())
}

/// An open engine plus name/prefix resolution for command arguments.
struct Session {
    folio: Folio,
}

impl Session {
    fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Init { .. } => bail!("init runs without an open store"),
            Command::Doc(cmd) => self.doc(cmd),
            Command::Group(cmd) => self.group(cmd),
            Command::Add(args) => self.add(args),
            Command::Edit(args) => self.edit(args),
            Command::Mv {
                document,
                blocks,
                group,
                parent,
                before,
            } => {
                let doc = self.document(&document)?;
                let ids = blocks
                    .iter()
                    .map(|b| self.block(doc, b))
                    .collect::<Result<Vec<_>>>()?;
                let group = group.map(|g| self.group_id(doc, &g)).transpose()?;
                let mut request = MoveRequest::new(ids, group);
                if let Some(parent) = parent {
                    request = request.under(self.block(doc, &parent)?);
                }
                if let Some(before) = before {
                    request = request.before(self.block(doc, &before)?);
                }
                ensure_write(&AllowAll, PrincipalId::system(), WriteScope::new(doc, group))?;
                let outcome = self.folio.move_blocks(request)?;
                println!("{outcome:?}");
                Ok(())
            }
            Command::Rm { document, block } => {
                let doc = self.document(&document)?;
                let id = self.block(doc, &block)?;
                let group = self.folio.store().get_block(id)?.and_then(|b| b.group_id);
                ensure_write(&AllowAll, PrincipalId::system(), WriteScope::new(doc, group))?;
                let removed = self.folio.delete_block(id)?;
                println!("removed {removed} block(s)");
                Ok(())
            }
            Command::Tree {
                document,
                group,
                document_only,
                depth,
                json,
            } => {
                let doc = self.document(&document)?;
                let filter = match (group, document_only) {
                    (Some(g), _) => GroupFilter::Group(self.group_id(doc, &g)?),
                    (None, true) => GroupFilter::Document,
                    (None, false) => GroupFilter::All,
                };
                let tree = self.folio.load_tree(doc, filter)?;
                if json {
                    let nodes = tree.into_nodes();
                    println!("{}", serde_json::to_string_pretty(&nodes)?);
                } else if tree.is_empty() {
                    println!("(empty)");
                } else {
                    for line in tree::format_tree(tree, depth) {
                        println!("{line}");
                    }
                }
                Ok(())
            }
            Command::Check { document } => {
                let doc = self.document(&document)?;
                let violations = self.folio.check_document(doc)?;
                if violations.is_empty() {
                    println!("ok");
                    return Ok(());
                }
                for v in &violations {
                    println!("{v}");
                }
                bail!("{} problem(s) found", violations.len())
            }
        }
    }

    fn doc(&self, cmd: DocCommand) -> Result<()> {
        let store = self.folio.store();
        match cmd {
            DocCommand::New { name, description } => {
                let doc = store.create_document(&name, description.as_deref())?;
                println!("{} {}", doc.id.short(), doc.name);
            }
            DocCommand::Ls => {
                for doc in store.list_documents()? {
                    println!("{} {}", doc.id.short(), doc.name);
                }
            }
            DocCommand::Rm { document } => {
                let doc = self.document(&document)?;
                ensure_write(&AllowAll, PrincipalId::system(), WriteScope::new(doc, None))?;
                store.delete_document(doc)?;
                println!("deleted {}", doc.short());
            }
        }
        Ok(())
    }

    fn group(&self, cmd: GroupCommand) -> Result<()> {
        let store = self.folio.store();
        match cmd {
            GroupCommand::New {
                document,
                name,
                description,
            } => {
                let doc = self.document(&document)?;
                let group = store.create_group(doc, &name, description.as_deref())?;
                println!("{} {}", group.id.short(), group.name);
            }
            GroupCommand::Ls { document } => {
                let doc = self.document(&document)?;
                for group in store.list_groups(doc)? {
                    println!("{} {}", group.id.short(), group.name);
                }
            }
            GroupCommand::Rm { document, group } => {
                let doc = self.document(&document)?;
                let id = self.group_id(doc, &group)?;
                ensure_write(&AllowAll, PrincipalId::system(), WriteScope::new(doc, Some(id)))?;
                store.delete_group(id)?;
                println!("deleted {}", id.short());
            }
        }
        Ok(())
    }

    fn add(&self, args: AddArgs) -> Result<()> {
        let doc = self.document(&args.document)?;
        let group = args.group.map(|g| self.group_id(doc, &g)).transpose()?;
        let parent = args.parent.map(|p| self.block(doc, &p)).transpose()?;
        let scope = Scope::root(doc).in_group(group).under(parent);
        let content = build_content(args.content, None)?;

        let request = match args.before {
            Some(before) => NewBlock::before(scope, self.block(doc, &before)?, content),
            None => NewBlock::append(scope, content),
        };
        ensure_write(&AllowAll, PrincipalId::system(), WriteScope::new(doc, group))?;
        let block = self.folio.create_block(request)?;
        println!("{} at {}", block.id.short(), block.order_number);
        Ok(())
    }

    fn edit(&self, args: EditArgs) -> Result<()> {
        let doc = self.document(&args.document)?;
        let id = self.block(doc, &args.block)?;
        let existing = self
            .folio
            .store()
            .get_block(id)?
            .with_context(|| format!("block {} vanished", id.short()))?;
        let mut content = build_content(args.content, Some(&existing))?;
        if args.clear_ref {
            content.reference = None;
        }
        ensure_write(
            &AllowAll,
            PrincipalId::system(),
            WriteScope::new(doc, existing.group_id),
        )?;
        let block = self.folio.update_block(id, content)?;
        println!("{} updated", block.id.short());
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Resolution: full id, exact name, or unique hex prefix
    // ------------------------------------------------------------------------

    fn document(&self, query: &str) -> Result<DocumentId> {
        let docs = self.folio.store().list_documents()?;
        Ok(resolve_prefix(
            docs.iter().map(|d| (d.id, Some(d.name.as_str()))),
            query,
        )?)
    }

    fn group_id(&self, document: DocumentId, query: &str) -> Result<GroupId> {
        let groups = self.folio.store().list_groups(document)?;
        Ok(resolve_prefix(
            groups.iter().map(|g| (g.id, Some(g.name.as_str()))),
            query,
        )?)
    }

    fn block(&self, document: DocumentId, query: &str) -> Result<BlockId> {
        let blocks: Vec<Block> = self
            .folio
            .load_tree(document, GroupFilter::All)?
            .into_walk()
            .map(|(_, b)| b)
            .collect();
        Ok(resolve_prefix(
            blocks.iter().map(|b| (b.id, b.title.as_deref())),
            query,
        )?)
    }
}

/// Build block content from flags. With `existing`, unspecified fields keep
/// their current values; an empty `--title ""` or `--body ""` clears one.
fn build_content(args: ContentArgs, existing: Option<&Block>) -> Result<BlockContent> {
    let style_type = match (&args.style, existing) {
        (Some(s), _) => parse_style_type(s)?,
        (None, Some(b)) => b.style_type,
        (None, None) => Default::default(),
    };
    let content_type = match (&args.content_type, existing) {
        (Some(c), _) => Some(parse_content_type(c)?),
        (None, Some(b)) => b.content_type,
        (None, None) => None,
    };
    let reference: Option<ReferenceInput> = match (args.url, args.link_group) {
        (Some(_), Some(_)) => bail!("--url and --link-group are exclusive"),
        (Some(url), None) => Some(NewReference::url(url).into()),
        (None, Some(name)) => Some(NewReference::group(name).into()),
        (None, None) => existing
            .and_then(|b| b.reference)
            .map(|r: Reference| r.into()),
    };
    Ok(BlockContent {
        style_type,
        content_type,
        title: args.title.or_else(|| existing.and_then(|b| b.title.clone())),
        body: args.body.or_else(|| existing.and_then(|b| b.body.clone())),
        reference,
    })
}
