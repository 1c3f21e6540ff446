// This file is part of a random-access media source library.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Compiles `wrapper.c` (the thin shim exposing struct-layout-independent
//! accessors, `moonfire_ffmpeg_*`) and links against the system's libav*
//! via `pkg-config`, following the teacher's `moonfire-ffmpeg` build step.

fn main() {
    println!("cargo:rerun-if-changed=wrapper.c");
    println!("cargo:rerun-if-changed=wrapper.h");

    let libs = ["libavutil", "libavcodec", "libavformat"];
    let mut build = cc::Build::new();
    build.file("wrapper.c");

    for lib in libs {
        match pkg_config::probe_library(lib) {
            Ok(l) => {
                for path in &l.include_paths {
                    build.include(path);
                }
            }
            Err(e) => {
                panic!("pkg-config could not find {lib}: {e}\n\
                        install the ffmpeg development packages (e.g. libavutil-dev, \
                        libavcodec-dev, libavformat-dev) for your platform");
            }
        }
    }

    build.compile("moonfire_ffmpeg_wrapper");
}
