
mod snapback_scenarios;
