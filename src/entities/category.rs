// 🏷️ Rating Categories - the eight policy areas an activity can concern
//
// Every contact carries one score per category plus an overall score.
// Category codes are the option values used by the activity records (1..=8).

use serde::{Deserialize, Serialize};

// ============================================================================
// CATEGORY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Livestock,
    Aquaculture,
    AnimalTesting,
    AnimalRights,
    HuntingWildlife,
    Pets,
    AnimalsEntertainment,
    FoodConsumerProtection,
}

impl Category {
    pub const COUNT: usize = 8;

    /// All categories in code order
    pub const ALL: [Category; Category::COUNT] = [
        Category::Livestock,
        Category::Aquaculture,
        Category::AnimalTesting,
        Category::AnimalRights,
        Category::HuntingWildlife,
        Category::Pets,
        Category::AnimalsEntertainment,
        Category::FoodConsumerProtection,
    ];

    pub fn code(&self) -> i64 {
        self.index() as i64 + 1
    }

    pub fn from_code(code: i64) -> Option<Category> {
        if (1..=Category::COUNT as i64).contains(&code) {
            Some(Category::ALL[(code - 1) as usize])
        } else {
            None
        }
    }

    /// Position inside a score array
    pub fn index(&self) -> usize {
        match self {
            Category::Livestock => 0,
            Category::Aquaculture => 1,
            Category::AnimalTesting => 2,
            Category::AnimalRights => 3,
            Category::HuntingWildlife => 4,
            Category::Pets => 5,
            Category::AnimalsEntertainment => 6,
            Category::FoodConsumerProtection => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Livestock => "livestock",
            Category::Aquaculture => "aquaculture",
            Category::AnimalTesting => "animal_testing",
            Category::AnimalRights => "animal_rights",
            Category::HuntingWildlife => "hunting_wildlife",
            Category::Pets => "pets",
            Category::AnimalsEntertainment => "animals_entertainment",
            Category::FoodConsumerProtection => "food_consumer_protection",
        }
    }

    /// Score column in the contacts table
    pub fn column(&self) -> &'static str {
        match self {
            Category::Livestock => "livestock_rating",
            Category::Aquaculture => "aquaculture_rating",
            Category::AnimalTesting => "animal_testing_rating",
            Category::AnimalRights => "animal_rights_rating",
            Category::HuntingWildlife => "hunting_wildlife_rating",
            Category::Pets => "pets_rating",
            Category::AnimalsEntertainment => "animals_entertainment_rating",
            Category::FoodConsumerProtection => "food_consumer_protection_rating",
        }
    }
}

// ============================================================================
// CATEGORY SCORES
// ============================================================================

/// Overall score plus one score per category
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryScores {
    pub overall: f64,
    pub by_category: [f64; Category::COUNT],
}

impl CategoryScores {
    /// Same value everywhere
    pub fn uniform(value: f64) -> Self {
        CategoryScores {
            overall: value,
            by_category: [value; Category::COUNT],
        }
    }

    pub fn get(&self, category: Category) -> f64 {
        self.by_category[category.index()]
    }

    pub fn set(&mut self, category: Category, value: f64) {
        self.by_category[category.index()] = value;
    }

    /// Apply `f` to the overall score and to every category score
    pub fn map(&self, f: impl Fn(f64) -> f64) -> CategoryScores {
        CategoryScores {
            overall: f(self.overall),
            by_category: self.by_category.map(&f),
        }
    }

    /// Combine two score sets field by field
    pub fn zip_with(&self, other: &CategoryScores, f: impl Fn(f64, f64) -> f64) -> CategoryScores {
        let mut by_category = [0.0; Category::COUNT];
        for (i, slot) in by_category.iter_mut().enumerate() {
            *slot = f(self.by_category[i], other.by_category[i]);
        }
        CategoryScores {
            overall: f(self.overall, other.overall),
            by_category,
        }
    }

    /// Iterate (category, score) pairs in code order
    pub fn iter(&self) -> impl Iterator<Item = (Category, f64)> + '_ {
        Category::ALL.iter().map(move |c| (*c, self.get(*c)))
    }
}
