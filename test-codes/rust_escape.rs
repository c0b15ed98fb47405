// Sandbox escape attempt: shells out, reads system files, opens a socket.
use std::env;
use std::fs;
use std::net::TcpStream;
use std::process::Command;
use std::time::Duration;

fn main() {
    match Command::new("id").output() {
        Ok(output) => println!("{}", String::from_utf8_lossy(&output.stdout)),
        Err(e) => println!("command failed: {}", e),
    }

    match fs::read_to_string("/etc/passwd") {
        Ok(content) => println!("{}", &content[..content.len().min(500)]),
        Err(e) => println!("read failed: {}", e),
    }

    for (key, value) in env::vars().take(5) {
        println!("{}={}", key, value);
    }

    match TcpStream::connect_timeout(&"1.1.1.1:80".parse().unwrap(), Duration::from_secs(3)) {
        Ok(_) => println!("network reachable"),
        Err(e) => println!("connect failed: {}", e),
    }

    unsafe {
        let ptr: *mut i32 = std::ptr::null_mut();
        println!("{:?}", ptr);
    }
}
