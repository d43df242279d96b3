//! Shared fixtures for CLI integration tests.

#![allow(dead_code)]

use std::path::Path;

pub const CONFIG: &str = r#"
[run]
method = "prototype"
backbone = "prototype"
seed = 1
log_step = 1

[datasets]
root = "data"
base = "toy"
target = "toy"
linear_classifier = "toy"

[active_learning]
enabled = true
budget_schedule = [3, 2]
finetune_epochs = 1

[reference]
feature_dim = 8

[stages.base]
batch_size = 4
image_size = 8
learning_rate = 0.05
epochs = 2
optimizer = "sgd"

[stages.active_learning]
batch_size = 4
image_size = 8
learning_rate = 0.01
epochs = 1
optimizer = "adam"

[stages.target]
batch_size = 4
image_size = 8
learning_rate = 0.05
epochs = 2
optimizer = "sgd"

[stages.linear_classifier]
batch_size = 4
image_size = 8
learning_rate = 0.5
epochs = 3
optimizer = "sgd"
"#;

/// Writes `sift.toml` plus a two-class `toy` dataset with train and val splits under `root`.
pub fn write_fixture(root: &Path) {
    std::fs::write(root.join("sift.toml"), CONFIG).unwrap();

    for (split, count) in [("train", 6), ("val", 2)] {
        for (class, byte) in [("low", 10_u8), ("high", 240_u8)] {
            let dir = root.join("data").join("toy").join(split).join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..count {
                let content: Vec<u8> = (0..32).map(|j| byte.wrapping_add(((i + j) % 8) as u8)).collect();
                std::fs::write(dir.join(format!("{i}.bin")), content).unwrap();
            }
        }
    }
}
