use serde::{Deserialize, Serialize};

/// Linear scorer with bias. `Logistic` models reuse it and squash the sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    /// Input columns, in the order weights apply.
    pub feature_names: Vec<String>,
    /// One weight per feature.
    pub weights: Vec<f64>,
    /// Intercept.
    #[serde(default)]
    pub bias: f64,
}

impl LinearModel {
    fn raw(&self, features: &[f64]) -> f64 {
        features
            .iter()
            .zip(self.weights.iter())
            .map(|(feature, weight)| feature * weight)
            .sum::<f64>()
            + self.bias
    }

    fn validate(&self) -> Result<(), String> {
        if self.weights.len() != self.feature_names.len() {
            return Err(format!(
                "{} weights for {} features",
                self.weights.len(),
                self.feature_names.len()
            ));
        }
        if !self.bias.is_finite() || self.weights.iter().any(|weight| !weight.is_finite()) {
            return Err("weights must be finite".into());
        }
        Ok(())
    }
}

/// Node of a flattened regression tree. Split nodes carry `feature`,
/// `threshold`, `left`, and `right`; leaves carry `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Feature index compared at this node; `None` marks a leaf.
    #[serde(default)]
    pub feature: Option<usize>,
    /// Samples with `x[feature] <= threshold` go left.
    #[serde(default)]
    pub threshold: f64,
    /// Left child index.
    #[serde(default)]
    pub left: Option<usize>,
    /// Right child index.
    #[serde(default)]
    pub right: Option<usize>,
    /// Leaf output.
    #[serde(default)]
    pub value: f64,
}

/// Regression tree stored as a node array rooted at index 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    /// Nodes; children always sit after their parent.
    pub nodes: Vec<TreeNode>,
}

impl RegressionTree {
    fn evaluate(&self, features: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            let node = &self.nodes[index];
            match (node.feature, node.left, node.right) {
                (Some(feature), Some(left), Some(right)) => {
                    let value = features.get(feature).copied().unwrap_or(f64::NAN);
                    index = if value <= node.threshold { left } else { right };
                }
                _ => return node.value,
            }
        }
    }

    fn validate(&self, width: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree without nodes".into());
        }
        for (index, node) in self.nodes.iter().enumerate() {
            match (node.feature, node.left, node.right) {
                (Some(feature), Some(left), Some(right)) => {
                    if feature >= width {
                        return Err(format!("node {index} splits on feature {feature} of {width}"));
                    }
                    let count = self.nodes.len();
                    if left <= index || right <= index || left >= count || right >= count {
                        return Err(format!("node {index} has out-of-order children"));
                    }
                }
                (None, None, None) => {}
                _ => return Err(format!("node {index} is neither a split nor a leaf")),
            }
        }
        Ok(())
    }
}

/// Averaged ensemble of regression trees (random-forest style).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestModel {
    /// Input columns, in the order split indices refer to.
    pub feature_names: Vec<String>,
    /// Member trees.
    pub trees: Vec<RegressionTree>,
}

/// Pre-trained delay classifier. Every variant produces one score per row;
/// callers threshold it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DelayModel {
    /// Raw linear score.
    Linear(LinearModel),
    /// Linear score passed through the logistic function.
    Logistic(LinearModel),
    /// Mean of tree outputs.
    Forest(ForestModel),
}

impl DelayModel {
    /// Feature columns the model was trained on.
    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        match self {
            Self::Linear(model) | Self::Logistic(model) => &model.feature_names,
            Self::Forest(model) => &model.feature_names,
        }
    }

    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Linear(_) => "linear",
            Self::Logistic(_) => "logistic",
            Self::Forest(_) => "forest",
        }
    }

    /// Checks internal consistency (widths, finite weights, tree shape).
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Linear(model) | Self::Logistic(model) => model.validate(),
            Self::Forest(model) => {
                if model.trees.is_empty() {
                    return Err("forest without trees".into());
                }
                let width = model.feature_names.len();
                model
                    .trees
                    .iter()
                    .enumerate()
                    .try_for_each(|(index, tree)| {
                        tree.validate(width).map_err(|reason| format!("tree {index}: {reason}"))
                    })
            }
        }
    }

    /// Scores one feature vector laid out as `feature_names`.
    #[must_use]
    pub fn score(&self, features: &[f64]) -> f64 {
        match self {
            Self::Linear(model) => model.raw(features),
            Self::Logistic(model) => sigmoid(model.raw(features)),
            Self::Forest(model) => {
                #[allow(clippy::cast_precision_loss)]
                let count = model.trees.len() as f64;
                model.trees.iter().map(|tree| tree.evaluate(features)).sum::<f64>() / count
            }
        }
    }

    /// Scores a batch of rows.
    #[must_use]
    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|row| self.score(row)).collect()
    }
}

fn sigmoid(value: f64) -> f64 {
    1.0 / (1.0 + (-value).exp())
}
