use std::fs;
use std::path::Path;

fn main() {
    println!("cargo:rerun-if-changed=src");

    // Stale logs from a previous run confuse debugging sessions.
    if Path::new("undercurrent.log").exists() {
        fs::remove_file("undercurrent.log").expect("Failed to delete log file");
        println!("cargo:warning=Deleted undercurrent.log");
    }
}
