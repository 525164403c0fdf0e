//! Print the header of IDX files
//!
//! Usage: idx-info <file>...

use std::env;
use std::process;

use mldata::dataset::{inspect, Layout};

fn main() {
    let paths: Vec<String> = env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("Usage: idx-info <file>...");
        process::exit(1);
    }

    let mut failed = false;
    for path in &paths {
        match inspect(path) {
            Ok((header, len)) => {
                let layout = Layout::new(header.element, header.rank());
                let status = match layout.check_file(&header, len) {
                    Ok(()) => "ok".to_string(),
                    Err(e) => {
                        failed = true;
                        e.to_string()
                    }
                };
                println!("{}", path);
                println!("  magic:    0x{:08X} ({})", header.magic, header.magic);
                println!("  element:  {}", header.element.as_str());
                println!("  shape:    {:?}", header.dims);
                println!("  header:   {} bytes", header.byte_len());
                match header.total_len() {
                    Ok(declared) => println!("  declared: {} bytes", declared),
                    Err(e) => println!("  declared: {}", e),
                }
                println!("  actual:   {} bytes", len);
                println!("  status:   {}", status);
            }
            Err(e) => {
                failed = true;
                eprintln!("{}: {}", path, e);
            }
        }
    }

    if failed {
        process::exit(1);
    }
}
