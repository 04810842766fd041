//! Static table of major cities per country.
//!
//! Used when location research and text generation are unavailable: as the
//! country heuristic of the planner, as the research fallback, and as the last
//! expansion strategy.

/// Canonical name, lowercase aliases, cities ordered by population.
type CountryEntry = (&'static str, &'static [&'static str], &'static [&'static str]);

const COUNTRIES: &[CountryEntry] = &[
    (
        "France",
        &["fr"],
        &[
            "Paris", "Marseille", "Lyon", "Toulouse", "Nice", "Nantes", "Montpellier",
            "Strasbourg", "Bordeaux", "Lille", "Rennes", "Reims",
        ],
    ),
    (
        "Germany",
        &["de", "deutschland"],
        &[
            "Berlin", "Hamburg", "Munich", "Cologne", "Frankfurt", "Stuttgart", "Düsseldorf",
            "Leipzig", "Dortmund", "Essen", "Bremen", "Dresden",
        ],
    ),
    (
        "Spain",
        &["es", "españa"],
        &[
            "Madrid", "Barcelona", "Valencia", "Seville", "Zaragoza", "Málaga", "Murcia",
            "Palma", "Bilbao", "Alicante",
        ],
    ),
    (
        "Italy",
        &["it", "italia"],
        &[
            "Rome", "Milan", "Naples", "Turin", "Palermo", "Genoa", "Bologna", "Florence",
            "Bari", "Verona",
        ],
    ),
    (
        "Portugal",
        &["pt"],
        &["Lisbon", "Porto", "Braga", "Coimbra", "Funchal", "Faro", "Aveiro"],
    ),
    (
        "Belgium",
        &["be", "belgique"],
        &["Brussels", "Antwerp", "Ghent", "Charleroi", "Liège", "Bruges", "Namur"],
    ),
    (
        "Netherlands",
        &["nl", "holland", "the netherlands"],
        &[
            "Amsterdam", "Rotterdam", "The Hague", "Utrecht", "Eindhoven", "Groningen",
            "Tilburg",
        ],
    ),
    (
        "Switzerland",
        &["ch", "suisse", "schweiz"],
        &["Zurich", "Geneva", "Basel", "Lausanne", "Bern", "Lucerne"],
    ),
    (
        "United Kingdom",
        &["uk", "gb", "great britain", "england"],
        &[
            "London", "Birmingham", "Manchester", "Glasgow", "Liverpool", "Leeds", "Bristol",
            "Edinburgh", "Sheffield", "Newcastle",
        ],
    ),
    (
        "Ireland",
        &["ie"],
        &["Dublin", "Cork", "Limerick", "Galway", "Waterford"],
    ),
    (
        "United States",
        &["us", "usa", "united states of america", "america"],
        &[
            "New York", "Los Angeles", "Chicago", "Houston", "Phoenix", "Philadelphia",
            "San Antonio", "San Diego", "Dallas", "Austin", "Miami", "Seattle",
        ],
    ),
    (
        "Canada",
        &["ca"],
        &[
            "Toronto", "Montreal", "Vancouver", "Calgary", "Edmonton", "Ottawa", "Quebec City",
            "Winnipeg",
        ],
    ),
    (
        "Mexico",
        &["mx", "méxico"],
        &[
            "Mexico City", "Guadalajara", "Monterrey", "Puebla", "Tijuana", "León", "Cancún",
        ],
    ),
    (
        "Brazil",
        &["br", "brasil"],
        &[
            "São Paulo", "Rio de Janeiro", "Brasília", "Salvador", "Fortaleza",
            "Belo Horizonte", "Curitiba", "Recife",
        ],
    ),
    (
        "Morocco",
        &["ma", "maroc"],
        &["Casablanca", "Rabat", "Marrakesh", "Fes", "Tangier", "Agadir"],
    ),
    (
        "Australia",
        &["au"],
        &["Sydney", "Melbourne", "Brisbane", "Perth", "Adelaide", "Canberra"],
    ),
    (
        "India",
        &["in", "bharat"],
        &[
            "Mumbai", "Delhi", "Bangalore", "Hyderabad", "Chennai", "Kolkata", "Pune",
            "Ahmedabad",
        ],
    ),
    (
        "United Arab Emirates",
        &["uae", "emirates"],
        &["Dubai", "Abu Dhabi", "Sharjah", "Ajman"],
    ),
];

fn find(country: &str) -> Option<&'static CountryEntry> {
    let key = country.trim().to_lowercase();
    COUNTRIES.iter().find(|(name, aliases, _)| {
        name.to_lowercase() == key || aliases.iter().any(|a| *a == key)
    })
}

/// Canonical name of a known country or alias.
#[must_use]
pub fn canonical_country(name: &str) -> Option<&'static str> {
    find(name).map(|(country, _, _)| *country)
}

/// Whether the name is a known country or alias.
#[must_use]
pub fn is_known_country(name: &str) -> bool {
    find(name).is_some()
}

/// Major cities of a country, largest first.
#[must_use]
pub fn cities_for(country: &str) -> &'static [&'static str] {
    match find(country) {
        Some(entry) => entry.2,
        None => &[],
    }
}

/// Country a listed city belongs to.
#[must_use]
pub fn country_of_city(city: &str) -> Option<&'static str> {
    let key = city.trim().to_lowercase();
    COUNTRIES
        .iter()
        .find(|(_, _, cities)| cities.iter().any(|c| c.to_lowercase() == key))
        .map(|(country, _, _)| *country)
}
