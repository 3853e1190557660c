use crate::schema::Category;
use crate::schema::Post;
use crate::schema::PostListing;
use crate::schema::StockLevel;

/// How many categories [`DashboardStats::top_categories`] keeps.
pub const TOP_CATEGORIES: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryCount {
    pub category:      Category,
    pub product_count: usize,
}

/// Figures shown on the admin dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardStats {
    /// Backend total of the posts listing, or the number of listed posts when it reports none.
    pub total_products:   u64,
    pub total_categories: usize,
    pub main_categories:  usize,
    pub sub_categories:   usize,
    pub out_of_stock:     usize,
    pub low_stock:        usize,
    pub in_stock:         usize,
    /// Sum of price times quantity over the listed posts.
    pub total_value:      f64,
    /// Categories with the most listed posts, best first. Ties keep the backend order.
    pub top_categories:   Vec<CategoryCount>,
    pub featured:         Vec<Post>,
    pub low_stock_posts:  Vec<Post>,
}

impl DashboardStats {
    pub fn compute(posts: &PostListing, categories: &[Category], featured: Vec<Post>, low_stock_posts: Vec<Post>) -> Self {
        let items = posts.items();
        let count_level = |level: StockLevel| items.iter().filter(|post| post.stock_level() == level).count();

        let main_categories = categories.iter().filter(|category| category.is_main()).count();

        let mut top_categories = categories
            .iter()
            .map(|category| CategoryCount {
                category:      category.clone(),
                product_count: items
                    .iter()
                    .filter(|post| post.category_id == Some(category.id))
                    .count(),
            })
            .collect::<Vec<_>>();
        top_categories.sort_by(|a, b| b.product_count.cmp(&a.product_count));
        top_categories.truncate(TOP_CATEGORIES);

        Self {
            total_products: posts.total(),
            total_categories: categories.len(),
            main_categories,
            sub_categories: categories.len() - main_categories,
            out_of_stock: count_level(StockLevel::OutOfStock),
            low_stock: count_level(StockLevel::Low),
            in_stock: count_level(StockLevel::InStock),
            total_value: items.iter().map(Post::inventory_value).sum(),
            top_categories,
            featured,
            low_stock_posts,
        }
    }
}
