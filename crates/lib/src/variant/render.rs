//! Image recipe rendering.
//!
//! One template serves both variants; the plan's toggles decide whether the
//! `EXPOSE` and `CMD` instructions are active, commented out, or left out.

use std::fmt::Write;

use super::{ImagePlan, Toggle};
use crate::config::ImageConfig;

const TOOL_STAGE: &str = "bootseq-tool";
const SOURCE_DIR: &str = "/src";

/// Render a Dockerfile for `plan`.
///
/// `config_name` is the build config's file name inside the docker build context.
pub fn render_dockerfile(plan: &ImagePlan, image: &ImageConfig, config_name: &str) -> String {
  let mut out = String::new();
  let workdir = &image.workdir;

  // Writing to a String cannot fail.
  let _ = writeln!(out, "# syntax=docker/dockerfile:1");
  let _ = writeln!(out, "# Generated by bootseq ({} variant).", plan.variant);
  let _ = writeln!(out, "FROM {} AS {}", image.tool, TOOL_STAGE);
  let _ = writeln!(out);
  let _ = writeln!(out, "FROM {}", image.base);
  let _ = writeln!(
    out,
    "COPY --from={} /usr/local/bin/bootseq /usr/local/bin/bootseq",
    TOOL_STAGE
  );
  let _ = writeln!(out, "WORKDIR {}", workdir);
  let _ = writeln!(out, "COPY . {}", SOURCE_DIR);
  let _ = writeln!(
    out,
    "RUN bootseq --config {}/{} build --context {} && rm -rf {}",
    SOURCE_DIR, config_name, workdir, SOURCE_DIR
  );

  if let Some(port) = plan.port {
    write_toggled(&mut out, plan.expose, &format!("EXPOSE {}", port));
  }

  let cmd = format!("CMD [\"bootseq\", \"start\", \"--context\", \"{}\"]", workdir);
  write_toggled(&mut out, plan.launch_mode, &cmd);

  out
}

fn write_toggled(out: &mut String, toggle: Toggle, instruction: &str) {
  match toggle {
    Toggle::Enabled => {
      let _ = writeln!(out, "{}", instruction);
    }
    Toggle::Disabled => {
      let _ = writeln!(out, "# {}", instruction);
    }
    Toggle::Absent => {}
  }
}
