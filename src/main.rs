use std::{path::PathBuf, process};

use clap::Parser;
use scenebake::convert::{ConvertOptions, convert_document, report_path};
use scenebake::geometry::GenerationMode;

#[derive(Parser, Debug)]
#[command(name = "scenebake")]
#[command(version)]
#[command(about = "Bake a COLLADA scene into an engine-ready binary")]
struct CliArgs {
    input: PathBuf,
    output: PathBuf,

    /// JSON file with conversion options; flags below override it.
    #[arg(long)]
    options: Option<PathBuf>,

    #[arg(long)]
    weld_tolerance: Option<f32>,

    #[arg(long)]
    no_generate_normals: bool,

    /// Fail instead of falling back to the source channels when attribute
    /// generation fails.
    #[arg(long)]
    no_fallback: bool,

    #[arg(long)]
    no_report: bool,
}

fn main() {
    env_logger::init();
    if let Err(err) = run(CliArgs::parse()) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}

fn run(args: CliArgs) -> anyhow::Result<()> {
    let mut options = match &args.options {
        Some(path) => ConvertOptions::from_json_file(path)?,
        None => ConvertOptions::default(),
    };
    if let Some(tolerance) = args.weld_tolerance {
        options.weld.tolerance = tolerance;
    }
    if args.no_generate_normals {
        options.weld.generation.normals = GenerationMode::Never;
    }
    if args.no_fallback {
        options.weld.generation.fallback = false;
    }
    if args.no_report {
        options.write_report = false;
    }

    let report = convert_document(&args.input, &args.output, &options)?;

    println!("Input: {} ({} document(s))", report.input, report.documents_loaded);
    println!("Up axis: {}", report.up_axis);
    println!(
        "Meshes: {}, Vertices: {}, Triangles: {}",
        report.mesh_count, report.total_vertices, report.total_triangles
    );
    println!(
        "Collision: {} triangles, {} tree nodes",
        report.physics.triangles, report.physics.tree_nodes
    );
    println!("Issues: {}", report.issues.len());
    if options.write_report {
        println!("Report: {}", report_path(&args.output).display());
    }

    Ok(())
}
