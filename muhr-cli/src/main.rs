use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use muhr_core::invoice::sign::invoice_digest_base64;
use muhr_core::invoice::InvoiceSigner;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "muhr")]
#[command(about = "ZATCA e-invoice signer: XAdES envelope and QR payload")]
struct Cli {
    /// Log filter, e.g. "debug" or "muhr_core=trace"
    #[arg(long, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign an invoice and emit the signed document
    Sign {
        #[arg(long)]
        invoice: PathBuf,
        #[arg(long)]
        cert: PathBuf,
        #[arg(long)]
        key: PathBuf,
        /// Output path; stdout when omitted
        #[arg(long)]
        signed_invoice: Option<PathBuf>,
    },
    /// Print the QR payload for an invoice
    Qr {
        #[arg(long)]
        invoice: PathBuf,
        #[arg(long)]
        cert: PathBuf,
        #[arg(long)]
        key: PathBuf,
    },
    /// Print the canonical document digest (base64)
    GenerateHash {
        #[arg(long)]
        invoice: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Sign {
            invoice,
            cert,
            key,
            signed_invoice,
        } => {
            let signer = load_signer(&cert, &key)?;
            let xml = read_file(&invoice)?;
            let signed = signer.sign_xml(&xml)?;
            match signed_invoice {
                Some(path) => fs::write(&path, signed.xml())
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => println!("{}", signed.xml()),
            }
        }
        Commands::Qr { invoice, cert, key } => {
            let signer = load_signer(&cert, &key)?;
            let xml = read_file(&invoice)?;
            let signed = signer.sign_xml(&xml)?;
            println!("{}", signed.qr_code());
        }
        Commands::GenerateHash { invoice } => {
            let xml = read_file(&invoice)?;
            let doc = libxml::parser::Parser::default()
                .parse_string(&xml)
                .map_err(|e| anyhow::anyhow!("failed to parse invoice XML: {e:?}"))?;
            println!("{}", invoice_digest_base64(&doc)?);
        }
    }

    Ok(())
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn load_signer(cert: &Path, key: &Path) -> Result<InvoiceSigner> {
    let cert_data = read_file(cert)?;
    let key_data = read_file(key)?;
    let signer = if cert_data.contains("-----BEGIN") && key_data.contains("-----BEGIN") {
        InvoiceSigner::from_pem(&cert_data, &key_data)?
    } else {
        InvoiceSigner::from_base64(cert_data.trim(), key_data.trim())?
    };
    Ok(signer)
}
