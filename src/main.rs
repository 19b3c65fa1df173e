use std::io::Write;

use meshcrack::{CrackOptions, Cracker, ProgressReport, ResumeKind};

fn usage() -> ! {
    eprintln!("Usage: meshcrack <packet-hex> [wordlist.txt] [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --cpu                 bypass the GPU backend");
    eprintln!("  --max-len <N>         brute-force length cap (default 8)");
    eprintln!("  --start-from <NAME>   resume strictly after NAME");
    eprintln!("  --start-kind <KIND>   dictionary | bruteforce (default bruteforce)");
    eprintln!("  --no-filters          disable timestamp and UTF-8 filters");
    std::process::exit(2);
}

fn parse_args() -> (String, Option<String>, CrackOptions) {
    let mut args = std::env::args().skip(1);
    let mut packet_hex = None;
    let mut wordlist = None;
    let mut opts = CrackOptions::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--cpu" => opts.force_cpu = true,
            "--no-filters" => {
                opts.use_timestamp_filter = false;
                opts.use_utf8_filter = false;
            }
            "--max-len" => match args.next().and_then(|v| v.parse().ok()) {
                Some(n) => opts.max_length = n,
                None => usage(),
            },
            "--start-from" => match args.next() {
                Some(name) => opts.start_from = Some(name),
                None => usage(),
            },
            "--start-kind" => match args.next().as_deref() {
                Some("dictionary") => opts.start_from_kind = ResumeKind::Dictionary,
                Some("bruteforce") => opts.start_from_kind = ResumeKind::Bruteforce,
                _ => usage(),
            },
            _ if packet_hex.is_none() => packet_hex = Some(arg),
            _ if wordlist.is_none() => wordlist = Some(arg),
            _ => usage(),
        }
    }

    match packet_hex {
        Some(hex) => (hex, wordlist, opts),
        None => usage(),
    }
}

fn print_progress(report: &ProgressReport) {
    let pct = if report.total > 0 {
        report.checked as f64 / report.total as f64 * 100.0
    } else {
        100.0
    };
    print!(
        "\r[{}] {:.2}%  {} / {} candidates  {:.0}/s  ETA {:.0}s   ",
        report.phase, pct, report.checked, report.total, report.rate, report.eta_secs
    );
    let _ = std::io::stdout().flush();
}

fn main() {
    println!("--- meshcrack: group channel name recovery ---\n");

    let (packet_hex, wordlist, opts) = parse_args();

    let mut cracker = Cracker::new();

    if let Some(path) = &wordlist {
        match cracker.load_wordlist(path) {
            Ok(n) => println!("📖 Wordlist: {} ({} usable words)", path, n),
            Err(err) => {
                eprintln!("❌ {}", err);
                std::process::exit(1);
            }
        }
    }

    if opts.force_cpu {
        println!("⚙️  Backend: CPU (forced)");
    } else if meshcrack::is_gpu_available() {
        println!("⚙️  Backend: GPU");
    } else {
        println!("⚙️  Backend: CPU (no GPU available)");
    }

    println!("\n🚀 Cracking...\n");

    let mut on_progress = print_progress;
    let result = cracker.crack(&packet_hex, &opts, Some(&mut on_progress));
    println!();

    if result.found {
        println!("\n!!! ROOM FOUND !!!");
        if let Some(name) = &result.room_name {
            println!("Room:    {}", name);
        }
        if let Some(key) = &result.key {
            println!("Key:     {}", hex::encode(key));
        }
        if let Some(message) = &result.message {
            println!("Message: {}", message);
        }
    } else if result.aborted {
        println!("\n⏹  Aborted.");
    } else if let Some(err) = &result.error {
        eprintln!("\n❌ {}", err);
    } else {
        println!("\nSearch space exhausted, no room found.");
    }

    // Machine-readable result (carries the resume cursor).
    println!(
        "\n{}",
        serde_json::to_string_pretty(&result).expect("result serializes")
    );

    if result.error.is_some() {
        std::process::exit(1);
    }
}
