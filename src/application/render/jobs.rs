use crate::application::markup::Extraction;
use crate::domain::{bitmap::Color, entries::ImageReference};

use super::types::{MathRequest, RenderJob};

/// Jobs for one batch, partitioned by concurrency class.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPlan {
    pub remote: Vec<RenderJob>,
    pub math: Vec<RenderJob>,
    pub local: Vec<RenderJob>,
}

impl JobPlan {
    /// Number of results the completion gate must wait for.
    pub fn total(&self) -> usize {
        self.remote.len() + self.math.len() + self.local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn into_jobs(self) -> impl Iterator<Item = RenderJob> {
        self.remote
            .into_iter()
            .chain(self.math)
            .chain(self.local)
    }
}

/// Classify every extracted entry into exactly one job.
pub fn plan_jobs(extraction: &Extraction, font_size: f32, color: Color) -> JobPlan {
    let mut plan = JobPlan::default();

    for (range, entry) in &extraction.math {
        plan.math.push(RenderJob::MathRender {
            location: range.key(),
            request: MathRequest {
                latex: entry.latex.clone(),
                style: entry.style,
                font_size,
                color,
            },
        });
    }

    for (range, entry) in &extraction.images {
        match &entry.reference {
            ImageReference::Remote(url) => plan.remote.push(RenderJob::RemoteFetch {
                location: range.key(),
                url: url.clone(),
            }),
            ImageReference::Local(name) => plan.local.push(RenderJob::LocalLoad {
                location: range.key(),
                name: name.clone(),
            }),
        }
    }

    plan
}
