use std::fs::File;
use std::process::exit;

use clap::{arg, command};
use log::{error, info};

use spamatch::algorithm::AlgorithmConfig;
use spamatch::io::snapshot;
use spamatch::run::MatchingRunner;
use spamatch::solver::HttpSolver;
use spamatch::store::{AllocationRow, MemoryStore, Store};
use spamatch::MatchError;

fn main() {
    env_logger::init();

    let matches = command!()
        .about(
            "Assemble a student-project matching problem from an instance snapshot, run it \
             against a matching server and report the outcome",
        )
        .arg(arg!(<FILE> "Instance snapshot file (JSON)"))
        .arg(
            arg!(-s --server <URL> "Base URL of the matching server")
                .default_value("http://localhost:8000"),
        )
        .arg(
            arg!(-a --algorithm <NAME> "Display name of the algorithm configuration to run")
                .default_value("Generous"),
        )
        .arg(arg!(-o --output [FILE] "Write the resulting allocation as JSON to this file"))
        .arg(arg!(--select "Commit the result as the instance's canonical allocation"))
        .get_matches();

    let path = matches.get_one::<String>("FILE").unwrap();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            error!("Could not open snapshot file '{}': {}", path, e);
            exit(exitcode::NOINPUT);
        }
    };
    let data = match snapshot::read(file) {
        Ok(data) => data,
        Err(e) => {
            error!("Could not read snapshot file '{}': {}", path, e);
            exit(exitcode::DATAERR);
        }
    };
    let instance_id = data.instance.id.clone();
    info!(
        "Read instance '{}': {} students, {} projects, {} supervisors",
        instance_id,
        data.students.len(),
        data.projects.len(),
        data.supervisors.len()
    );

    let store = MemoryStore::new();
    store.insert(data);
    for config in AlgorithmConfig::built_ins() {
        if let Err(e) = store.create_algorithm(&instance_id, config) {
            error!("Could not register built-in algorithms: {}", e);
            exit(exitcode::SOFTWARE);
        }
    }

    let name = matches.get_one::<String>("algorithm").unwrap();
    let alg_id = match store
        .algorithms(&instance_id)
        .ok()
        .and_then(|configs| configs.into_iter().find(|c| &c.display_name == name))
    {
        Some(config) => config.id,
        None => {
            error!("Unknown algorithm configuration '{}'", name);
            exit(exitcode::USAGE);
        }
    };

    let solver = HttpSolver::new(matches.get_one::<String>("server").unwrap().as_str());
    let runner = MatchingRunner::new(&store, &solver);

    let summary = match runner.run(&instance_id, &alg_id) {
        Ok(summary) => summary,
        Err(MatchError::Infeasible) => {
            error!("{}", MatchError::Infeasible);
            exit(exitcode::DATAERR);
        }
        Err(e) => {
            error!("Matching run failed: {}", e);
            exit(exitcode::SOFTWARE);
        }
    };
    info!("Matched {} of {} students", summary.matched, summary.total);

    let result = match store.result(&instance_id, &alg_id) {
        Ok(Some(result)) => result,
        _ => {
            error!("No matching result found after the run");
            exit(exitcode::SOFTWARE);
        }
    };

    let projects = match store.projects(&instance_id) {
        Ok(projects) => projects,
        Err(e) => {
            error!("{}", e);
            exit(exitcode::SOFTWARE);
        }
    };
    print!("{}", spamatch::io::format_allocation(&result.pairs, &projects));

    let allocation_rows: Vec<AllocationRow> = if matches.get_flag("select") {
        if let Err(e) = runner.select(&instance_id, &alg_id) {
            error!("Could not select the matching result: {}", e);
            exit(exitcode::SOFTWARE);
        }
        match store.allocations(&instance_id) {
            Ok(allocations) => allocations,
            Err(e) => {
                error!("{}", e);
                exit(exitcode::SOFTWARE);
            }
        }
    } else {
        result
            .pairs
            .iter()
            .map(|p| AllocationRow {
                student_id: p.student_id.clone(),
                project_id: p.project_id.clone(),
                rank: p.rank,
            })
            .collect()
    };

    if let Some(out_path) = matches.get_one::<String>("output") {
        let out = match File::create(out_path) {
            Ok(out) => out,
            Err(e) => {
                error!("Could not create output file '{}': {}", out_path, e);
                exit(exitcode::CANTCREAT);
            }
        };
        if let Err(e) = snapshot::write_allocation(out, &allocation_rows) {
            error!("Could not write output file '{}': {}", out_path, e);
            exit(exitcode::IOERR);
        }
        info!("Wrote allocation to '{}'", out_path);
    }
}
