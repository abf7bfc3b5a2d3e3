use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use seexpr::render::{self, Scene};

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    Summary,
    Values,
    Ppm,
}

#[derive(Parser, Debug)]
#[command(
    name = "seexpr",
    version,
    about = "Evaluate a seexpr shader node over a grid of shading samples"
)]
struct Cli {
    /// Scene description (JSON: options, node, attributes)
    scene: PathBuf,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Summary)]
    emit: EmitStage,

    /// Grid width in samples
    #[arg(long, default_value_t = 8)]
    width: usize,

    /// Grid height in samples
    #[arg(long, default_value_t = 8)]
    height: usize,

    /// Worker threads (overrides the scene's options.threads)
    #[arg(long)]
    threads: Option<usize>,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log classification and strategy decisions
    #[arg(long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "seexpr=debug" } else { "seexpr=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(filter)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // ── Load scene ──
    let mut scene = match Scene::load(&cli.scene) {
        Ok(s) => s,
        Err(render::LoadError::Io { path, source }) => {
            eprintln!("seexpr: error: {}: {}", path.display(), source);
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("seexpr: error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(threads) = cli.threads {
        scene.options.threads = threads;
    }

    let mut out: Box<dyn Write> = match &cli.output {
        Some(path) => match File::create(path) {
            Ok(f) => Box::new(BufWriter::new(f)),
            Err(e) => {
                eprintln!("seexpr: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        },
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let result = match cli.emit {
        EmitStage::Summary => {
            let node = scene.build_node();
            write!(out, "{}", node.config().summary()).map_err(|e| e.to_string())
        }
        EmitStage::Values | EmitStage::Ppm => {
            match render::render_scene(&scene, cli.width, cli.height) {
                Ok(image) => emit_image(&mut out, &cli, &image).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            }
        }
    };

    if let Err(e) = result.and_then(|()| out.flush().map_err(|e| e.to_string())) {
        eprintln!("seexpr: error: {}", e);
        std::process::exit(1);
    }
}

fn emit_image(out: &mut dyn Write, cli: &Cli, image: &[seexpr::Vec3]) -> io::Result<()> {
    match cli.emit {
        EmitStage::Ppm => render::write_ppm(out, image, cli.width, cli.height),
        _ => {
            for (i, px) in image.iter().enumerate() {
                let x = i % cli.width.max(1);
                let y = i / cli.width.max(1);
                writeln!(out, "{} {} {} {} {}", x, y, px.x, px.y, px.z)?;
            }
            Ok(())
        }
    }
}
