use std::env;
use std::fs::File;
use std::io::Write;
use std::path::Path;

//HAZARD_RCU_LOCAL_CAPACITY

fn main() {
    println!("cargo:rerun-if-env-changed=HAZARD_RCU_LOCAL_CAPACITY");

    let out_dir = env::var("OUT_DIR").expect("no out directory");
    let dest = Path::new(&out_dir).join("build_constants.rs");

    let mut file = File::create(&dest).expect("could not create file");

    let capacity: usize = env::var("HAZARD_RCU_LOCAL_CAPACITY")
        .ok()
        .map_or(Ok(32), |var| var.parse())
        .expect("failed to parse env variable HAZARD_RCU_LOCAL_CAPACITY");

    if capacity == 0 {
        panic!("invalid HAZARD_RCU_LOCAL_CAPACITY value (0)");
    }

    write!(&mut file, "const LOCAL_CAPACITY: usize = {};", capacity)
        .expect("could not write to file");
}
