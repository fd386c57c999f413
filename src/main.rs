use anyhow::{Context, Result, bail};
use clap::Parser;
use pkgplan::executor::{Executor, TransferRequest, run_transfer_request};
use pkgplan::package::Package;
use pkgplan::resolver::DependencyResolver;
use pkgplan::runtime::RealRuntime;
use pkgplan::site::InstallationTarget;
use pkgplan::{InstallationPlanner, ResolveError};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

/// pkgplan - inspect and maintain a package site
///
/// A site is a directory holding one sub-directory per installed package,
/// each with a record.json describing it.
///
/// Examples:
///   pkgplan --site ./env list        # List installed packages
///   pkgplan force-remove foo         # Remove foo without dependency checks
#[derive(Parser, Debug)]
#[command(author, about, version = env!("PKGPLAN_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Site directory (defaults to the current directory; also via PKGPLAN_SITE)
    #[arg(
        long = "site",
        short = 's',
        env = "PKGPLAN_SITE",
        value_name = "PATH",
        default_value = ".",
        global = true
    )]
    pub site: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// List installed packages; user requested ones are marked with `*`
    List,

    /// Uninstall a package without checking what depends on it
    ForceRemove(ForceRemoveArgs),

    /// Run one operation read as JSON from stdin (used by the process pool)
    #[command(hide = true)]
    Worker,
}

#[derive(clap::Args, Debug)]
pub struct ForceRemoveArgs {
    /// Name of the installed package
    #[arg(value_name = "NAME")]
    pub name: String,
}

/// The binary never resolves anything; force removal does not need a solver.
struct NoResolver;

impl DependencyResolver for NoResolver {
    fn resolve(
        &self,
        root: &pkgplan::package::Dependency,
        _target: &InstallationTarget,
        _repository: &dyn pkgplan::repository::Repository,
        _overrides: &pkgplan::resolver::DependencyOverrides,
    ) -> std::result::Result<Vec<Arc<dyn Package>>, ResolveError> {
        Err(ResolveError::Other(anyhow::anyhow!(
            "No dependency resolver available to resolve {}",
            root
        )))
    }
}

fn list(target: &InstallationTarget, out: &mut impl Write) -> Result<()> {
    let site = target.site_packages()?;
    let containers = target.package_containers()?;

    for package in site.packages() {
        let marker = if package.is_user_requested() { " *" } else { "" };
        writeln!(out, "{}{}", package.descriptor(), marker)?;

        if let Some(container) = containers.container_of(&package.descriptor().name) {
            for plugin in container.list_installed_plugins()? {
                writeln!(out, "  + {}", plugin.descriptor())?;
            }
        }
    }
    Ok(())
}

fn force_remove(target: Arc<InstallationTarget>, name: &str) -> Result<()> {
    let runtime = RealRuntime;
    let executor = Executor::from_env(&runtime)?;
    let planner = InstallationPlanner::new(target, Arc::new(NoResolver), Arc::new(executor));

    if !planner.force_remove(name)? {
        bail!("Package {} is not installed", name);
    }
    Ok(())
}

fn worker(target: &InstallationTarget) -> Result<()> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read transfer request")?;
    let request: TransferRequest =
        serde_json::from_str(&input).context("Failed to parse transfer request")?;
    run_transfer_request(target, request)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let target = Arc::new(InstallationTarget::new(Arc::new(RealRuntime), &cli.site));

    match cli.command {
        Commands::List => list(&target, &mut std::io::stdout().lock())?,
        Commands::ForceRemove(args) => force_remove(target, &args.name)?,
        Commands::Worker => worker(&target)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pkgplan::package::{ManifestPackage, StoreMode};
    use tempfile::tempdir;

    #[test]
    fn test_cli_list_parsing() {
        let cli = Cli::try_parse_from(["pkgplan", "list"]).unwrap();
        assert!(matches!(cli.command, Commands::List));
        assert_eq!(cli.site, PathBuf::from("."));
    }

    #[test]
    fn test_cli_force_remove_parsing() {
        let cli = Cli::try_parse_from(["pkgplan", "force-remove", "foo", "--site", "/tmp"]).unwrap();
        match cli.command {
            Commands::ForceRemove(args) => assert_eq!(args.name, "foo"),
            _ => panic!("Expected ForceRemove command"),
        }
        assert_eq!(cli.site, PathBuf::from("/tmp"));
    }

    #[test]
    fn test_cli_global_site_parsing() {
        let cli = Cli::try_parse_from(["pkgplan", "-s", "/opt/site", "worker"]).unwrap();
        assert!(matches!(cli.command, Commands::Worker));
        assert_eq!(cli.site, PathBuf::from("/opt/site"));
    }

    #[test]
    fn test_cli_force_remove_requires_name() {
        assert!(Cli::try_parse_from(["pkgplan", "force-remove"]).is_err());
    }

    #[test]
    fn test_list_output() {
        let dir = tempdir().unwrap();
        let target = InstallationTarget::new(Arc::new(RealRuntime), dir.path());
        ManifestPackage::new("foo", "1.0".parse().unwrap())
            .install_to(&target, Some(&"foo".parse().unwrap()), StoreMode::Copy)
            .unwrap();
        ManifestPackage::new("bar", "2.1".parse().unwrap())
            .install_to(&target, None, StoreMode::Copy)
            .unwrap();

        let mut out = Vec::new();
        list(&target, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "bar 2.1\nfoo 1.0 *\n");
    }
}
