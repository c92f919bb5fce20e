//! HTML rendering of the search page, result table and map.

use serde::Serialize;

use crate::search::SearchResponse;

/// Map centre when nothing could be located (Seoul City Hall).
const DEFAULT_CENTER: (f64, f64) = (37.5665, 126.9780);
const MAX_ZOOM: u8 = 15;
const REVIEW_EXCERPT_CHARS: usize = 160;

/// Values echoed back into the search form.
#[derive(Debug, Clone)]
pub struct SearchForm {
    pub query: String,
    pub min_similarity: f32,
    pub max_results: usize,
    pub max_results_limit: usize,
}

/// Marker payload handed to the map script.
#[derive(Debug, Serialize)]
struct MapMarker<'a> {
    name: &'a str,
    address: &'a str,
    review_text: String,
    similarity: f32,
    latitude: f64,
    longitude: f64,
    scale: f32,
    fill_color: String,
}

/// Marker radius for a similarity score.
pub fn marker_scale(similarity: f32) -> f32 {
    15.0 + similarity.clamp(0.0, 1.0) * 25.0
}

/// Marker fill colour, red (0) to green (1).
pub fn marker_color(similarity: f32) -> String {
    let hue = similarity.clamp(0.0, 1.0) * 120.0;
    format!("hsl({hue:.0}, 100%, 50%)")
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= REVIEW_EXCERPT_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(REVIEW_EXCERPT_CHARS).collect();
    format!("{}...", cut.trim_end())
}

fn percent(similarity: f32) -> String {
    format!("{:.2}%", similarity * 100.0)
}

/// Render the whole page. `notice` is shown above the results.
pub fn render_page(
    form: &SearchForm,
    response: Option<&SearchResponse>,
    notice: Option<&str>,
    maps_api_key: &str,
) -> String {
    let mut body = String::new();
    body.push_str(&render_form(form));

    if let Some(notice) = notice {
        body.push_str(&format!(
            "<p class=\"notice\">{}</p>\n",
            escape_html(notice)
        ));
    }

    if let Some(response) = response {
        if response.is_empty() {
            body.push_str(
                "<p class=\"notice\">No places met the minimum similarity. Try lowering it.</p>\n",
            );
        } else {
            body.push_str(&render_table(response));
            body.push_str(&render_map(response, maps_api_key));
        }
    }

    format!(
        r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <title>Place recommendations</title>
    <style>
      body {{ font-family: sans-serif; margin: 2rem; }}
      table {{ border-collapse: collapse; width: 100%; margin: 1rem 0; }}
      th, td {{ border: 1px solid #ccc; padding: 0.4rem; text-align: left; vertical-align: top; }}
      .notice {{ background: #fff4d6; padding: 0.6rem; }}
      .unmapped {{ color: #999; }}
      #map {{ width: 100%; height: 500px; }}
    </style>
  </head>
  <body>
    <h1>Place recommendations</h1>
{body}  </body>
</html>
"#
    )
}

fn render_form(form: &SearchForm) -> String {
    format!(
        r#"    <form method="get" action="/search">
      <input type="text" name="q" value="{query}" placeholder="Describe the place you are looking for" size="60">
      <label>Minimum similarity
        <input type="range" name="min_similarity" min="0" max="1" step="0.01" value="{min:.2}"
               oninput="this.nextElementSibling.value = this.value">
        <output>{min:.2}</output>
      </label>
      <label>Results
        <input type="number" name="max_results" min="1" max="{limit}" value="{max}">
      </label>
      <button type="submit">Search</button>
    </form>
"#,
        query = escape_html(&form.query),
        min = form.min_similarity,
        max = form.max_results,
        limit = form.max_results_limit,
    )
}

fn render_table(response: &SearchResponse) -> String {
    let mut rows = String::new();
    for m in &response.matches {
        let class = if m.location.is_some() { "" } else { " class=\"unmapped\"" };
        rows.push_str(&format!(
            "        <tr{class}><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape_html(&m.candidate.place.name),
            escape_html(&m.candidate.place.address),
            escape_html(&m.candidate.place.review_text),
            percent(m.candidate.similarity),
        ));
    }

    format!(
        "    <h2>Recommended places</h2>\n    <table>\n      <thead><tr><th>Name</th><th>Address</th><th>Review</th><th>Similarity</th></tr></thead>\n      <tbody>\n{rows}      </tbody>\n    </table>\n"
    )
}

fn render_map(response: &SearchResponse, maps_api_key: &str) -> String {
    let markers: Vec<MapMarker> = response
        .mapped()
        .map(|(candidate, loc)| MapMarker {
            name: &candidate.place.name,
            address: &candidate.place.address,
            review_text: excerpt(&candidate.place.review_text),
            similarity: candidate.similarity,
            latitude: loc.lat,
            longitude: loc.lng,
            scale: marker_scale(candidate.similarity),
            fill_color: marker_color(candidate.similarity),
        })
        .collect();

    if markers.is_empty() {
        return "    <p class=\"notice\">The recommended places could not be located on the map.</p>\n"
            .to_string();
    }

    // keep "</script>" in place names from closing the script block
    let locations = serde_json::to_string(&markers)
        .unwrap_or_else(|_| "[]".to_string())
        .replace("</", "<\\/");

    format!(
        r##"    <h2>Map</h2>
    <div id="map"></div>
    <script>
      function initMap() {{
        const locations = {locations};
        const center = locations.length > 0
          ? {{ lat: locations[0].latitude, lng: locations[0].longitude }}
          : {{ lat: {center_lat}, lng: {center_lng} }};
        const map = new google.maps.Map(document.getElementById('map'), {{ zoom: 12, center: center }});
        const bounds = new google.maps.LatLngBounds();

        locations.forEach((location) => {{
          const position = new google.maps.LatLng(location.latitude, location.longitude);
          const marker = new google.maps.Marker({{
            position: position,
            map: map,
            title: location.name,
            icon: {{
              path: google.maps.SymbolPath.CIRCLE,
              scale: location.scale,
              fillColor: location.fill_color,
              fillOpacity: 0.8,
              strokeWeight: 2,
              strokeColor: "#000000"
            }}
          }});

          const content = document.createElement('div');
          content.style.maxWidth = '200px';
          [
            ['h3', location.name],
            ['p', 'Address: ' + location.address],
            ['p', 'Review: ' + location.review_text],
            ['p', 'Similarity: ' + (location.similarity * 100).toFixed(2) + '%']
          ].forEach(([tag, text]) => {{
            const el = document.createElement(tag);
            el.textContent = text;
            content.appendChild(el);
          }});
          const infoWindow = new google.maps.InfoWindow({{ content: content }});
          marker.addListener('click', () => infoWindow.open(map, marker));

          bounds.extend(position);
        }});

        map.fitBounds(bounds);
        google.maps.event.addListenerOnce(map, 'bounds_changed', () => {{
          if (map.getZoom() > {max_zoom}) map.setZoom({max_zoom});
        }});
      }}
    </script>
    <script async defer src="https://maps.googleapis.com/maps/api/js?key={key}&callback=initMap"></script>
"##,
        center_lat = DEFAULT_CENTER.0,
        center_lng = DEFAULT_CENTER.1,
        max_zoom = MAX_ZOOM,
        key = escape_html(maps_api_key),
    )
}
