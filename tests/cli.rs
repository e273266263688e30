mod common;

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::process::Command;

use common::{brute_force, factor_matrix};
use tempfile::tempdir;

fn write_matrix(path: &Path, matrix: &ndarray::Array2<f64>) {
    let names: Vec<String> = (0..matrix.ncols()).map(|j| format!("c{j}")).collect();
    let mut text = names.join("\t");
    text.push('\n');
    for row in matrix.rows() {
        let fields: Vec<String> = row.iter().map(|v| format!("{v}")).collect();
        writeln!(text, "{}", fields.join("\t")).expect("format row");
    }
    fs::write(path, text).expect("write matrix");
}

#[test]
fn search_writes_every_qualifying_pair() {
    let tmp = tempdir().expect("temporary directory");
    let matrix_path = tmp.path().join("matrix.tsv");
    let output_path = tmp.path().join("pairs.tsv");
    let matrix = factor_matrix(30, 50, 4, 12);
    write_matrix(&matrix_path, &matrix);

    let status = Command::new(env!("CARGO_BIN_EXE_tcor"))
        .args([
            "search",
            matrix_path.to_str().expect("path str"),
            "--threshold",
            "0.8",
            "--rank",
            "3",
            "--threads",
            "2",
            "--output",
            output_path.to_str().expect("path str"),
        ])
        .status()
        .expect("run tcor cli");
    assert!(status.success(), "CLI exited with status {status:?}");

    let written = fs::read_to_string(&output_path).expect("read output");
    let mut lines = written.lines();
    assert_eq!(lines.next(), Some("i\tj\tname_i\tname_j\tvalue"));
    let mut pairs: Vec<(usize, usize)> = lines
        .map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            assert_eq!(fields.len(), 5);
            let i: usize = fields[0].parse().expect("row index");
            let j: usize = fields[1].parse().expect("column index");
            assert_eq!(fields[2], format!("c{i}"));
            assert_eq!(fields[3], format!("c{j}"));
            let value: f64 = fields[4].parse().expect("value");
            assert!(value >= 0.8);
            (i, j)
        })
        .collect();
    pairs.sort_unstable();

    let expected: Vec<(usize, usize)> = brute_force(matrix.view(), 0.8, false)
        .into_iter()
        .map(|(i, j, _)| (i, j))
        .collect();
    assert_eq!(pairs, expected);
}

#[test]
fn tune_then_search_with_restart() {
    let tmp = tempdir().expect("temporary directory");
    let matrix_path = tmp.path().join("matrix.csv");
    let restart_path = tmp.path().join("restart.toml");
    let matrix = factor_matrix(25, 40, 3, 4);
    let names: Vec<String> = (0..matrix.ncols()).map(|j| format!("c{j}")).collect();
    let mut text = names.join(",");
    text.push('\n');
    for row in matrix.rows() {
        let fields: Vec<String> = row.iter().map(|v| format!("{v}")).collect();
        writeln!(text, "{}", fields.join(",")).expect("format row");
    }
    fs::write(&matrix_path, text).expect("write matrix");

    let status = Command::new(env!("CARGO_BIN_EXE_tcor"))
        .args([
            "tune",
            matrix_path.to_str().expect("path str"),
            "--rank",
            "4",
            "--save-restart",
            restart_path.to_str().expect("path str"),
        ])
        .status()
        .expect("run tcor tune");
    assert!(status.success(), "tune exited with status {status:?}");
    assert!(restart_path.exists(), "restart state missing");

    let output = Command::new(env!("CARGO_BIN_EXE_tcor"))
        .args([
            "search",
            matrix_path.to_str().expect("path str"),
            "--top",
            "5",
            "--max-iter",
            "30",
            "--rank",
            "4",
            "--restart",
            restart_path.to_str().expect("path str"),
        ])
        .output()
        .expect("run tcor search");
    assert!(output.status.success(), "search exited with {:?}", output.status);
    let stdout = String::from_utf8(output.stdout).expect("utf8 output");
    assert!(stdout.starts_with("i\tj\tname_i\tname_j\tvalue\n"));
    assert!(stdout.lines().count() > 1);
}

#[test]
fn invalid_threshold_exits_with_an_error() {
    let tmp = tempdir().expect("temporary directory");
    let matrix_path = tmp.path().join("matrix.tsv");
    write_matrix(&matrix_path, &factor_matrix(10, 8, 2, 1));

    let output = Command::new(env!("CARGO_BIN_EXE_tcor"))
        .args([
            "search",
            matrix_path.to_str().expect("path str"),
            "--threshold",
            "1.5",
        ])
        .output()
        .expect("run tcor search");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error:"), "stderr was {stderr}");
}
